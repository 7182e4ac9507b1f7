use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

/* ===== errors ===== */
#[derive(Serialize, Deserialize, Debug)]
#[serde(rename_all = "lowercase")]
pub enum OperationError {
    // Logic errors, or "soft" errors.
    /// The caller lacks the capability, or does not own the resource.
    AccessDenied,
    /// The key failed the validation rule of its identity type.
    InvalidKey,
    /// A `(type, key)` pair that must be unique is already in use.
    DuplicateKey,
    /// The targeted identity row does not exist.
    NotFound,
    NoSuchUser,
    PasswordMismatch,
    /// The call itself was malformed, eg. an empty key.
    BadArgument,
    /// The admin resource is managed out of band and can't be altered here.
    SystemProtectedObject,
    InvalidEntryState,
    PropertyStore(String),

    // Backend errors
    BackendEngine,
    SqliteError,
    SerdeJsonError,
    TransactionAlreadyCommitted,

    // Specific internal errors.
    ID0001TokenSpaceExhausted,
    ID0002UsernameSpaceExhausted,
}

impl PartialEq for OperationError {
    fn eq(&self, other: &Self) -> bool {
        // Generally we only use the PartialEq for TESTING, and there the variant
        // is what matters, not the attached detail.
        std::mem::discriminant(self) == std::mem::discriminant(other)
    }
}

impl Display for OperationError {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        let mut output = format!("{:?}", self)
            .split("::")
            .last()
            .unwrap_or("")
            .to_string();

        if let Some(msg) = self.message() {
            output += &format!(" - {}", msg);
        };
        f.write_str(&output)
    }
}

impl std::error::Error for OperationError {}

impl OperationError {
    /// Return the message associated with the error if there is one.
    pub fn message(&self) -> Option<String> {
        match self {
            Self::AccessDenied => None,
            Self::InvalidKey => Some("The submitted key is not valid for this identity type.".into()),
            Self::DuplicateKey => Some("The submitted key already exists.".into()),
            Self::NotFound => None,
            Self::NoSuchUser => None,
            Self::PasswordMismatch => None,
            Self::BadArgument => None,
            Self::SystemProtectedObject => Some("The admin account is configured externally and can not be changed.".into()),
            Self::InvalidEntryState => None,
            Self::PropertyStore(val) => Some(format!("Resource property store failure: {}", val)),
            Self::BackendEngine => None,
            Self::SqliteError => None,
            Self::SerdeJsonError => None,
            Self::TransactionAlreadyCommitted => None,
            Self::ID0001TokenSpaceExhausted => Some("Unable to generate an unused token within the retry limit.".into()),
            Self::ID0002UsernameSpaceExhausted => Some("Unable to generate an unused username within the retry limit.".into()),
        }
    }
}

#[test]
fn test_operationerror_as_nice_string() {
    assert_eq!(
        OperationError::ID0001TokenSpaceExhausted.to_string(),
        "ID0001TokenSpaceExhausted - Unable to generate an unused token within the retry limit."
            .to_string()
    );
    assert_eq!(
        OperationError::NoSuchUser.to_string(),
        "NoSuchUser".to_string()
    );
    assert_eq!(
        OperationError::PropertyStore("offline".to_string()).to_string(),
        "PropertyStore(\"offline\") - Resource property store failure: offline".to_string()
    );
}

#[test]
fn test_operationerror_eq_ignores_detail() {
    assert_eq!(
        OperationError::PropertyStore("a".to_string()),
        OperationError::PropertyStore("b".to_string())
    );
    assert_ne!(OperationError::NoSuchUser, OperationError::PasswordMismatch);
}

#[test]
fn test_operationerror_serde() {
    let s = serde_json::to_string(&OperationError::DuplicateKey).expect("serialise");
    assert_eq!(s, "\"duplicatekey\"");
}
