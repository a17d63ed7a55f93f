//! Built-in driver metadata used by the connector service.
//!
//! DSN templates are URL-form strings consumed by the pool layer. Tokens
//! `${Host}`/`${Port}`/`${Db}`/`${Project}`/`${Options}` are expanded from
//! non-secret input; `$Username`/`$Password` are expanded from the stored
//! credential at open time.

/// Credential shape requested from the user during the secret flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialShape {
    Basic,
    OAuth2,
}

#[derive(Debug, Clone)]
pub struct DriverDefaults {
    pub host: &'static str,
    pub port: u16,
    pub options: &'static str,
    pub scopes: &'static [&'static str],
}

#[derive(Debug, Clone)]
pub struct DriverMeta {
    pub driver: &'static str,
    pub dsn_template: &'static str,
    pub cred_shape: CredentialShape,
    pub defaults: DriverDefaults,
}

const NO_DEFAULTS: DriverDefaults = DriverDefaults {
    host: "",
    port: 0,
    options: "",
    scopes: &[],
};

const BIGQUERY_SCOPES: &[&str] = &[
    "https://www.googleapis.com/auth/bigquery",
    "https://www.googleapis.com/auth/userinfo.email",
    "https://www.googleapis.com/auth/cloud-platform",
];

const CONFIGS: &[DriverMeta] = &[
    DriverMeta {
        driver: "mysql",
        dsn_template: "mysql://$Username:$Password@${Host}:${Port}/${Db}?${Options}",
        cred_shape: CredentialShape::Basic,
        defaults: DriverDefaults {
            host: "localhost",
            port: 3306,
            options: "",
            scopes: &[],
        },
    },
    DriverMeta {
        driver: "postgres",
        dsn_template: "postgres://$Username:$Password@${Host}:${Port}/${Db}?${Options}",
        cred_shape: CredentialShape::Basic,
        defaults: DriverDefaults {
            host: "localhost",
            port: 5432,
            options: "sslmode=disable",
            scopes: &[],
        },
    },
    DriverMeta {
        driver: "sqlite",
        dsn_template: "sqlite://${Db}?${Options}",
        cred_shape: CredentialShape::Basic,
        defaults: NO_DEFAULTS,
    },
    DriverMeta {
        driver: "bigquery",
        dsn_template: "bigquery://${Project}/${Db}?${Options}",
        cred_shape: CredentialShape::OAuth2,
        defaults: DriverDefaults {
            host: "",
            port: 0,
            options: "",
            scopes: BIGQUERY_SCOPES,
        },
    },
    DriverMeta {
        driver: "oracle",
        dsn_template: "oracle://$Username:$Password@${Host}:${Port}/${Db}",
        cred_shape: CredentialShape::Basic,
        defaults: DriverDefaults {
            host: "localhost",
            port: 1521,
            options: "",
            scopes: &[],
        },
    },
];

/// Fallback entry for drivers without an explicit row (aerospike, firestore,
/// and anything unknown): basic credentials, no template.
const FALLBACK: DriverMeta = DriverMeta {
    driver: "",
    dsn_template: "",
    cred_shape: CredentialShape::Basic,
    defaults: NO_DEFAULTS,
};

/// Select the metadata entry matching a driver, or the default one.
pub fn match_meta(driver: &str) -> &'static DriverMeta {
    CONFIGS
        .iter()
        .find(|meta| meta.driver == driver)
        .unwrap_or(&FALLBACK)
}

/// Driver choices surfaced in the connector input schema.
pub const DRIVER_CHOICES: &[&str] = &[
    "mysql",
    "postgres",
    "sqlite",
    "bigquery",
    "oracle",
    "aerospike",
    "firestore",
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_drivers_have_templates() {
        for driver in ["mysql", "postgres", "sqlite", "bigquery", "oracle"] {
            let meta = match_meta(driver);
            assert_eq!(meta.driver, driver);
            assert!(!meta.dsn_template.is_empty(), "{driver} template missing");
        }
    }

    #[test]
    fn unknown_driver_falls_back_to_basic() {
        let meta = match_meta("aerospike");
        assert_eq!(meta.cred_shape, CredentialShape::Basic);
        assert!(meta.dsn_template.is_empty());
    }

    #[test]
    fn driver_choices_cover_every_registrable_driver() {
        assert_eq!(DRIVER_CHOICES.len(), 7);
        for driver in [
            "mysql",
            "postgres",
            "sqlite",
            "bigquery",
            "oracle",
            "aerospike",
            "firestore",
        ] {
            assert!(DRIVER_CHOICES.contains(&driver), "{driver} missing");
        }
    }

    #[test]
    fn bigquery_uses_oauth2() {
        let meta = match_meta("bigquery");
        assert_eq!(meta.cred_shape, CredentialShape::OAuth2);
        assert!(!meta.defaults.scopes.is_empty());
    }
}
