//! Server identifier types.

use std::sync::atomic::{AtomicI64, Ordering};

use chrono::Utc;

use crate::{define_string_id, IdError};

define_string_id!(
    /// Provisional server identifier, `{template}-{unix_nanos}`.
    ///
    /// Owns pool resources until the provider assigns an [`InstanceId`].
    ServerId
);

define_string_id!(
    /// Provider-assigned container identifier.
    InstanceId
);

/// Last nanosecond stamp handed out; keeps generated IDs strictly increasing.
static LAST_STAMP: AtomicI64 = AtomicI64::new(0);

fn next_stamp() -> i64 {
    let now = Utc::now()
        .timestamp_nanos_opt()
        .unwrap_or_else(|| Utc::now().timestamp_micros().saturating_mul(1_000));

    let mut last = LAST_STAMP.load(Ordering::Relaxed);
    loop {
        let next = if now > last { now } else { last + 1 };
        match LAST_STAMP.compare_exchange_weak(last, next, Ordering::AcqRel, Ordering::Relaxed) {
            Ok(_) => return next,
            Err(observed) => last = observed,
        }
    }
}

impl ServerId {
    /// Generates a fresh provisional ID for a server built from `template`.
    pub fn generate(template: &str) -> Result<Self, IdError> {
        if template.is_empty() || template.chars().any(|c| c.is_whitespace() || c.is_control()) {
            return Err(IdError::InvalidTemplate(template.to_string()));
        }

        Ok(Self(format!("{}-{}", template, next_stamp())))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use proptest::prelude::*;

    use super::*;

    #[test]
    fn test_server_id_format() {
        let id = ServerId::generate("lobby").unwrap();
        let (template, stamp) = id.as_str().rsplit_once('-').unwrap();
        assert_eq!(template, "lobby");
        assert!(stamp.parse::<i64>().unwrap() > 0);
    }

    #[test]
    fn test_server_id_template_with_dashes() {
        let id = ServerId::generate("skywars-duo").unwrap();
        let (template, stamp) = id.as_str().rsplit_once('-').unwrap();
        assert_eq!(template, "skywars-duo");
        assert!(stamp.parse::<i64>().is_ok());
    }

    #[test]
    fn test_server_id_generation_is_unique() {
        let ids: HashSet<_> = (0..1000)
            .map(|_| ServerId::generate("lobby").unwrap())
            .collect();
        assert_eq!(ids.len(), 1000);
    }

    #[test]
    fn test_server_id_generation_across_threads() {
        let handles: Vec<_> = (0..8)
            .map(|_| {
                std::thread::spawn(|| {
                    (0..200)
                        .map(|_| ServerId::generate("minigame").unwrap())
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut ids = HashSet::new();
        for handle in handles {
            for id in handle.join().unwrap() {
                assert!(ids.insert(id));
            }
        }
        assert_eq!(ids.len(), 1600);
    }

    #[test]
    fn test_server_id_rejects_bad_template() {
        assert!(matches!(
            ServerId::generate(""),
            Err(IdError::InvalidTemplate(_))
        ));
        assert!(matches!(
            ServerId::generate("my lobby"),
            Err(IdError::InvalidTemplate(_))
        ));
    }

    #[test]
    fn test_instance_id_empty() {
        let result: Result<InstanceId, _> = "".parse();
        assert!(result.unwrap_err().is_empty());
    }

    #[test]
    fn test_instance_id_whitespace() {
        let result: Result<InstanceId, _> = "abc def".parse();
        assert!(matches!(
            result.unwrap_err(),
            IdError::InvalidCharacter { character: ' ', .. }
        ));
    }

    #[test]
    fn test_instance_id_serde() {
        let id: InstanceId = "4f1c0a9e2b7d".parse().unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"4f1c0a9e2b7d\"");

        let back: InstanceId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);

        assert!(serde_json::from_str::<InstanceId>("\"\"").is_err());
    }

    proptest! {
        #[test]
        fn prop_generated_ids_keep_template(template in "[a-z][a-z0-9_-]{0,24}") {
            let id = ServerId::generate(&template).unwrap();
            let (prefix, stamp) = id.as_str().rsplit_once('-').unwrap();
            prop_assert_eq!(prefix, template.as_str());
            prop_assert!(stamp.parse::<i64>().is_ok());
        }
    }
}
