//! Username generation for accounts created without one, e.g. from a registration form or
//! an external login. Names are derived from the person's name, then the resource title, then
//! a random id, and disambiguated with a random numeric suffix.

use rand::{thread_rng, Rng};
use regex::Regex;

use crate::be::BackendTransaction;
use crate::prelude::*;
use crate::properties::get_property_text;
use crate::utils::lower_id_from_random;

lazy_static! {
    static ref SEPARATOR_RUN_RE: Regex = {
        #[allow(clippy::expect_used)]
        Regex::new(r"\.{2,}").expect("Invalid separator regex")
    };
}

// Latin letters with diacritics, spelled in ASCII. Anything else outside ASCII separates.
fn fold_to_ascii(c: char) -> Option<&'static str> {
    let folded = match c {
        'à'..='å' | 'ā' | 'ă' | 'ą' => "a",
        'æ' => "ae",
        'ç' | 'ć' | 'ĉ' | 'č' => "c",
        'ď' | 'đ' | 'ð' => "d",
        'è'..='ë' | 'ē' | 'ė' | 'ę' | 'ě' => "e",
        'ğ' | 'ģ' => "g",
        'ì'..='ï' | 'ī' | 'į' | 'ı' => "i",
        'ķ' => "k",
        'ĺ' | 'ļ' | 'ľ' | 'ł' => "l",
        'ñ' | 'ń' | 'ņ' | 'ň' => "n",
        'ò'..='ö' | 'ø' | 'ō' | 'ő' => "o",
        'œ' => "oe",
        'ŕ' | 'ř' => "r",
        'ś' | 'ş' | 'š' => "s",
        'ß' => "ss",
        'ţ' | 'ť' => "t",
        'þ' => "th",
        'ù'..='ü' | 'ū' | 'ů' | 'ű' | 'ų' => "u",
        'ý' | 'ÿ' => "y",
        'ź' | 'ż' | 'ž' => "z",
        _ => return None,
    };
    Some(folded)
}

/// Lowercase ASCII letters and digits, everything else turned into single separators and
/// trimmed from both ends. Accented Latin letters lose their accents. The input is cut to
/// `USERNAME_MAX_LEN` characters first.
pub fn slugify_username(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    for c in name
        .chars()
        .take(USERNAME_MAX_LEN)
        .flat_map(char::to_lowercase)
    {
        if c.is_ascii_alphanumeric() {
            slug.push(c);
        } else if let Some(folded) = fold_to_ascii(c) {
            slug.push_str(folded);
        } else {
            slug.push(USERNAME_SEPARATOR);
        }
    }
    let mut slug = SEPARATOR_RUN_RE
        .replace_all(&slug, ".")
        .trim_matches(USERNAME_SEPARATOR)
        .to_string();
    // Folding can lengthen it.
    if slug.len() > USERNAME_MAX_LEN {
        slug.truncate(USERNAME_MAX_LEN);
        slug = slug.trim_end_matches(USERNAME_SEPARATOR).to_string();
    }
    slug
}

impl IdentityStore {
    /// Propose a free username for the resource. Nothing is stored.
    #[instrument(level = "debug", skip_all)]
    pub fn generate_username(&self, rsc_id: ResourceId) -> Result<String, OperationError> {
        let base = self.username_base(rsc_id);
        debug!(%rsc_id, %base, "username base");
        self.make_unique_username(&base)
    }

    fn username_base(&self, rsc_id: ResourceId) -> String {
        let props = &*self.properties;
        let full_name = [PROPERTY_NAME_FIRST, PROPERTY_NAME_SURNAME]
            .into_iter()
            .filter_map(|p| get_property_text(props, rsc_id, p))
            .collect::<Vec<_>>()
            .join(" ");

        let base = slugify_username(&full_name);
        if !base.is_empty() {
            return base;
        }
        let base = get_property_text(props, rsc_id, PROPERTY_TITLE)
            .map(|t| slugify_username(&t))
            .unwrap_or_default();
        if !base.is_empty() {
            return base;
        }
        lower_id_from_random(USERNAME_RANDOM_LEN)
    }

    fn make_unique_username(&self, base: &str) -> Result<String, OperationError> {
        let txn = self.be.read()?;
        let is_free = |name: &str| -> Result<bool, OperationError> {
            Ok(!self.key_rules.is_reserved_name(name)
                && !txn.exists_type_key(IDENTITY_TYPE_USERNAME_PW, name, None)?)
        };

        if is_free(base)? {
            return Ok(base.to_string());
        }

        let mut rng = thread_rng();
        let mut range = USERNAME_SUFFIX_BASE;
        for _ in 0..USERNAME_MAX_ATTEMPTS {
            let candidate = format!("{}{}{}", base, USERNAME_SEPARATOR, rng.gen_range(0..range));
            if is_free(&candidate)? {
                return Ok(candidate);
            }
            range = range.saturating_mul(USERNAME_SUFFIX_BASE);
        }

        admin_error!(%base, "Unable to find a free username");
        Err(OperationError::ID0002UsernameSpaceExhausted)
    }
}
