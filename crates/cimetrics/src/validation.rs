//! Validation logic for label and metric names.

use crate::error::RegistryError;

const fn is_valid_start_name_char(ch: u8) -> bool {
    ch == b'_' || ch.is_ascii_lowercase()
}

const fn is_valid_name_char(ch: u8) -> bool {
    ch == b'_' || ch.is_ascii_lowercase() || ch.is_ascii_digit()
}

const fn validate_name(name: &str) -> Result<(), &'static str> {
    if name.is_empty() {
        return Err("name cannot be empty");
    }

    let name_bytes = name.as_bytes();
    let mut idx = 0;
    while idx < name.len() {
        if name_bytes[idx] > 127 {
            return Err("name contains non-ASCII chars");
        }
        if idx == 0 && !is_valid_start_name_char(name_bytes[idx]) {
            return Err("name starts with disallowed char (allowed chars: [_a-z])");
        } else if !is_valid_name_char(name_bytes[idx]) {
            return Err("name contains disallowed char (allowed chars: [_a-z0-9])");
        }
        idx += 1;
    }
    Ok(())
}

/// Checks that a metric name is valid.
///
/// # Errors
///
/// Returns [`RegistryError::InvalidName`] describing the first offending char.
pub fn check_metric_name(name: &str) -> Result<(), RegistryError> {
    validate_name(name).map_err(|reason| RegistryError::InvalidName {
        name: name.to_owned(),
        reason,
    })
}

/// Checks that all label names are valid and mutually distinct.
///
/// # Errors
///
/// Returns [`RegistryError::InvalidName`] for the first invalid or repeated label name.
pub fn check_label_names<S: AsRef<str>>(names: &[S]) -> Result<(), RegistryError> {
    for (i, name) in names.iter().enumerate() {
        let name = name.as_ref();
        validate_name(name).map_err(|reason| RegistryError::InvalidName {
            name: name.to_owned(),
            reason,
        })?;
        if names[..i].iter().any(|prev| prev.as_ref() == name) {
            return Err(RegistryError::InvalidName {
                name: name.to_owned(),
                reason: "label name is repeated",
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn validating_names() {
        let valid_names = ["test", "_private", "snake_case", "l33t_c0d3"];
        for name in valid_names {
            validate_name(name).unwrap();
        }

        validate_name("").unwrap_err();
        validate_name("нет").unwrap_err();
        validate_name("t!st").unwrap_err();
        validate_name("1est").unwrap_err();
        validate_name("Upper").unwrap_err();
    }

    #[test]
    fn validating_label_names() {
        check_label_names(&["job", "build", "author"]).unwrap();
        check_label_names::<&str>(&[]).unwrap();

        let err = check_label_names(&["job", "job"]).unwrap_err();
        assert_matches!(
            err,
            RegistryError::InvalidName { name, reason } if name == "job" && reason.contains("repeated")
        );
        let err = check_label_names(&["job", "build-no"]).unwrap_err();
        assert_matches!(err, RegistryError::InvalidName { name, .. } if name == "build-no");
    }
}
