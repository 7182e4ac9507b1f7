pub mod b64 {
    use base64::{engine::general_purpose, Engine as _};
    use serde::{de::Error as DeError, Deserialize, Deserializer, Serializer};
    use tracing::error;

    pub fn serialize<S>(bytes: &[u8], ser: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let s = general_purpose::URL_SAFE_NO_PAD.encode(bytes);
        ser.serialize_str(&s)
    }

    pub fn deserialize<'de, D>(des: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = <String>::deserialize(des)?;
        general_purpose::URL_SAFE_NO_PAD
            .decode(raw.trim_end_matches('='))
            .map_err(|err| {
                error!(?err, "base64 url-safe invalid");
                D::Error::custom("base64 url-safe invalid")
            })
    }
}
