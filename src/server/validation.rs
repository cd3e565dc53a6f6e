use crate::server::response::ApiError;

const MAX_ENTITY_NAME_LEN: usize = 256;

/// Prefix reserved for system bags and recipes. Names carrying it are only
/// accepted when the caller explicitly allows privileged characters.
pub const SYSTEM_PREFIX: &str = "$:/";

fn is_valid_name_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '-' | '_' | '.' | ' ' | '/')
}

fn validate_name(name: &str, entity: &str, allow_privileged: bool) -> Result<(), String> {
    if name.is_empty() {
        return Err(format!("{entity} name cannot be empty"));
    }
    if name.len() > MAX_ENTITY_NAME_LEN {
        return Err(format!(
            "{entity} name cannot exceed {MAX_ENTITY_NAME_LEN} bytes"
        ));
    }

    let (prefix_len, rest) = if name.starts_with(SYSTEM_PREFIX) {
        if !allow_privileged {
            return Err(format!(
                "{entity} name may not start with '{SYSTEM_PREFIX}'"
            ));
        }
        (SYSTEM_PREFIX.len(), &name[SYSTEM_PREFIX.len()..])
    } else {
        (0, name)
    };

    if !rest.chars().all(is_valid_name_char) {
        return Err(format!(
            "{entity} name can only contain alphanumeric characters, hyphens, underscores, \
             periods, spaces, and slashes"
        ));
    }
    if prefix_len == 0 && (name.starts_with('-') || name.starts_with('_')) {
        return Err(format!(
            "{entity} name cannot start with a hyphen or underscore"
        ));
    }
    Ok(())
}

pub fn validate_bag_name(name: &str, allow_privileged: bool) -> Result<(), ApiError> {
    validate_name(name, "Bag", allow_privileged).map_err(ApiError::bad_request)
}

pub fn validate_recipe_name(name: &str, allow_privileged: bool) -> Result<(), ApiError> {
    validate_name(name, "Recipe", allow_privileged).map_err(ApiError::bad_request)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_names_accepted() {
        assert!(validate_bag_name("notes", false).is_ok());
        assert!(validate_bag_name("team docs/2024", false).is_ok());
        assert!(validate_recipe_name("my-wiki.v2", false).is_ok());
    }

    #[test]
    fn test_system_prefix_needs_privilege() {
        assert!(validate_bag_name("$:/core", false).is_err());
        assert!(validate_bag_name("$:/core", true).is_ok());
    }

    #[test]
    fn test_rejects_empty_and_leading_special() {
        assert!(validate_bag_name("", false).is_err());
        assert!(validate_bag_name("-dash", false).is_err());
        assert!(validate_bag_name("_underscore", false).is_err());
    }
}
