/// Usernames that can never be claimed through the username/password identity. Extended at
/// runtime by `denied_names` in the configuration.
pub const RESERVED_USERNAMES: &[&str] = &[
    "admin",
    "administrator",
    "root",
    "postmaster",
    "hostmaster",
    "webmaster",
    "abuse",
    "security",
    "www",
    "wwwrun",
    "ftp",
    "uucp",
    "usenet",
    "news",
    "noc",
    "anonymous",
    "nobody",
    "sysadmin",
    "mailer-daemon",
];
