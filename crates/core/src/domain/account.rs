use std::fmt;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::errors::ValidationError;

pub const COUNTRY_CODE: &str = "+91";
const NATIONAL_DIGITS: usize = 10;
const OTP_DIGITS: usize = 6;
const PASSWORD_MIN: usize = 8;
const PASSWORD_MAX: usize = 16;
const USERNAME_MAX: usize = 9;
const NAME_MIN: usize = 3;
const NAME_MAX: usize = 100;

/// Which backend account family a signup writes to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Audience {
    Shop,
    Customer,
}

impl Audience {
    pub fn route_prefix(self) -> &'static str {
        match self {
            Self::Shop => "/shop",
            Self::Customer => "/user",
        }
    }
}

/// Ten national digits; always rendered with the `+91` country code.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct PhoneNumber {
    national: String,
}

impl PhoneNumber {
    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(ValidationError::new("phone_number", "phone number is required"));
        }

        let allowed = |ch: char| ch.is_ascii_digit() || matches!(ch, ' ' | '-' | '(' | ')');
        let body = trimmed.strip_prefix('+').unwrap_or(trimmed);
        if !body.chars().all(allowed) {
            return Err(ValidationError::new(
                "phone_number",
                "phone number may only contain digits",
            ));
        }

        let digits: String = body.chars().filter(char::is_ascii_digit).collect();
        let national = match digits.len() {
            NATIONAL_DIGITS => digits,
            12 if digits.starts_with("91") => digits[2..].to_string(),
            _ => {
                return Err(ValidationError::new(
                    "phone_number",
                    "expected a 10-digit phone number",
                ))
            }
        };

        Ok(Self { national })
    }

    pub fn national(&self) -> &str {
        &self.national
    }

    /// E.164 form sent to the verification provider and the backend.
    pub fn formatted(&self) -> String {
        format!("{COUNTRY_CODE}{}", self.national)
    }
}

impl fmt::Display for PhoneNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.formatted())
    }
}

impl Serialize for PhoneNumber {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.formatted())
    }
}

impl<'de> Deserialize<'de> for PhoneNumber {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OtpCode(String);

impl OtpCode {
    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        let code = raw.trim();
        if code.is_empty() {
            return Err(ValidationError::new("code", "verification code is required"));
        }
        if code.len() != OTP_DIGITS || !code.chars().all(|ch| ch.is_ascii_digit()) {
            return Err(ValidationError::new("code", "expected 6 digits"));
        }
        Ok(Self(code.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Credential value. Never printed by `Debug`.
#[derive(Clone)]
pub struct Password(SecretString);

impl Password {
    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        if raw.is_empty() {
            return Err(ValidationError::new("password", "password is required"));
        }
        let length = raw.chars().count();
        if length < PASSWORD_MIN {
            return Err(ValidationError::new(
                "password",
                "password must be at least 8 characters long",
            ));
        }
        if length > PASSWORD_MAX {
            return Err(ValidationError::new(
                "password",
                "password must be at most 16 characters long",
            ));
        }
        Ok(Self(SecretString::from(raw.to_string())))
    }

    /// Parses a new credential together with its confirmation field.
    pub fn parse_confirmed(raw: &str, confirmation: &str) -> Result<Self, ValidationError> {
        let password = Self::parse(raw)?;
        if raw != confirmation {
            return Err(ValidationError::new("confirm_password", "passwords do not match"));
        }
        Ok(password)
    }

    pub fn expose(&self) -> &str {
        self.0.expose_secret()
    }
}

impl PartialEq for Password {
    fn eq(&self, other: &Self) -> bool {
        self.expose() == other.expose()
    }
}

impl Eq for Password {}

impl fmt::Debug for Password {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Password(<redacted>)")
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Username(String);

impl Username {
    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        let username = raw.trim();
        if username.is_empty() {
            return Err(ValidationError::new("username", "username is required"));
        }
        if username.chars().any(char::is_whitespace) {
            return Err(ValidationError::new("username", "username cannot contain spaces"));
        }
        if username.chars().all(|ch| ch.is_ascii_digit()) {
            return Err(ValidationError::new("username", "username cannot be only numbers"));
        }
        if username.chars().count() > USERNAME_MAX {
            return Err(ValidationError::new(
                "username",
                "username should be within 9 characters",
            ));
        }
        Ok(Self(username.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayName(String);

impl DisplayName {
    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        let name = raw.trim();
        if name.is_empty() {
            return Err(ValidationError::new("name", "name is required"));
        }
        let length = name.chars().count();
        if !(NAME_MIN..=NAME_MAX).contains(&length) {
            return Err(ValidationError::new("name", "name must be 3 to 100 characters long"));
        }
        Ok(Self(name.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AccountDetails {
    pub name: DisplayName,
    pub username: Username,
    pub password: Password,
}

impl AccountDetails {
    pub fn parse(name: &str, username: &str, password: &str) -> Result<Self, ValidationError> {
        Ok(Self {
            name: DisplayName::parse(name)?,
            username: Username::parse(username)?,
            password: Password::parse(password)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{AccountDetails, OtpCode, Password, PhoneNumber, Username};

    #[test]
    fn phone_number_is_formatted_with_country_code() {
        let phone = PhoneNumber::parse("98765 43210").expect("valid phone");
        assert_eq!(phone.national(), "9876543210");
        assert_eq!(phone.formatted(), "+919876543210");
    }

    #[test]
    fn phone_number_accepts_already_formatted_input() {
        let phone = PhoneNumber::parse("+919876543210").expect("formatted phone");
        assert_eq!(phone.national(), "9876543210");
    }

    #[test]
    fn phone_number_rejects_wrong_digit_count_and_letters() {
        let short = PhoneNumber::parse("987654321").expect_err("nine digits");
        assert_eq!(short.message, "expected a 10-digit phone number");

        let empty = PhoneNumber::parse("   ").expect_err("empty");
        assert_eq!(empty.message, "phone number is required");

        let letters = PhoneNumber::parse("98765abc10").expect_err("letters");
        assert_eq!(letters.field, "phone_number");
    }

    #[test]
    fn otp_code_requires_six_digits() {
        assert!(OtpCode::parse("123456").is_ok());
        assert_eq!(OtpCode::parse("12345").expect_err("short").message, "expected 6 digits");
        assert_eq!(OtpCode::parse("12a456").expect_err("letter").message, "expected 6 digits");
    }

    #[test]
    fn confirmed_password_must_match() {
        let error = Password::parse_confirmed("longenough", "different1").expect_err("mismatch");
        assert_eq!(error.message, "passwords do not match");

        let error = Password::parse("short").expect_err("too short");
        assert_eq!(error.message, "password must be at least 8 characters long");
    }

    #[test]
    fn password_debug_is_redacted() {
        let password = Password::parse("hunter2hunter2").expect("valid password");
        assert!(!format!("{password:?}").contains("hunter2"));
    }

    #[test]
    fn username_rules_follow_signup_form() {
        assert!(Username::parse("ravi_k").is_ok());
        assert_eq!(
            Username::parse("12345").expect_err("digits").message,
            "username cannot be only numbers"
        );
        assert_eq!(
            Username::parse("ravi k").expect_err("space").message,
            "username cannot contain spaces"
        );
        assert_eq!(
            Username::parse("abcdefghij").expect_err("long").message,
            "username should be within 9 characters"
        );
    }

    #[test]
    fn account_details_report_first_failing_field() {
        let error = AccountDetails::parse("", "ravi", "longenough").expect_err("missing name");
        assert_eq!(error.field, "name");
    }
}
