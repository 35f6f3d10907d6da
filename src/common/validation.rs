//! Request validation shared by the auth and oauth handlers.

/// One rejected field
#[derive(Debug)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

#[derive(Debug, Default)]
pub struct ValidationResult {
    pub errors: Vec<ValidationError>,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn add_error(&mut self, field: &str, message: &str) {
        self.errors.push(ValidationError {
            field: field.to_string(),
            message: message.to_string(),
        });
    }

    /// Records an error when `ok` is false
    pub fn check(&mut self, ok: bool, field: &str, message: &str) {
        if !ok {
            self.add_error(field, message);
        }
    }
}

pub trait Validator<T> {
    fn validate(&self, data: &T) -> ValidationResult;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collects_every_failed_check() {
        let mut result = ValidationResult::new();
        result.check(true, "email", "unused");
        result.check(false, "password", "too short");
        result.check(false, "display_name", "too long");
        assert!(!result.is_valid());
        assert_eq!(result.errors.len(), 2);
        assert_eq!(result.errors[0].field, "password");
    }
}
