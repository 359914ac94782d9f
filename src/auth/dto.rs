use serde::{Deserialize, Serialize};

use super::services::is_valid_email;
use crate::error::{AppError, AppResult};

fn check_email(email: &str) -> AppResult<()> {
    if is_valid_email(email.trim()) {
        Ok(())
    } else {
        Err(AppError::bad_request("invalid email"))
    }
}

fn check_password(password: &str) -> AppResult<()> {
    if password.len() < 8 {
        return Err(AppError::bad_request("password too short"));
    }
    Ok(())
}

fn check_code(code: &str) -> AppResult<()> {
    if code.len() == super::otp::CODE_LEN && code.chars().all(|c| c.is_ascii_digit()) {
        Ok(())
    } else {
        Err(AppError::bad_request("invalid otp"))
    }
}

/// Request body for system signup.
#[derive(Debug, Deserialize)]
pub struct SignupRequest {
    pub username: String,
    pub email: String,
    pub password: String,
    pub confirm_password: String,
}

impl SignupRequest {
    pub fn validate(&self) -> AppResult<()> {
        check_email(&self.email)?;
        check_password(&self.password)?;
        if self.password != self.confirm_password {
            return Err(AppError::bad_request("passwords do not match"));
        }
        if self.username.trim().len() < 2 {
            return Err(AppError::bad_request("username too short"));
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
pub struct GoogleRequest {
    pub id_token: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

impl LoginRequest {
    pub fn validate(&self) -> AppResult<()> {
        check_email(&self.email)
    }
}

/// Resend-confirmation and forget-password bodies.
#[derive(Debug, Deserialize)]
pub struct EmailRequest {
    pub email: String,
}

impl EmailRequest {
    pub fn validate(&self) -> AppResult<()> {
        check_email(&self.email)
    }
}

#[derive(Debug, Deserialize)]
pub struct ConfirmEmailRequest {
    pub email: String,
    pub otp: String,
}

impl ConfirmEmailRequest {
    pub fn validate(&self) -> AppResult<()> {
        check_email(&self.email)?;
        check_code(&self.otp)
    }
}

#[derive(Debug, Deserialize)]
pub struct ResetPasswordRequest {
    pub email: String,
    pub otp: String,
    pub password: String,
    pub confirm_password: String,
}

impl ResetPasswordRequest {
    pub fn validate(&self) -> AppResult<()> {
        check_email(&self.email)?;
        check_code(&self.otp)?;
        check_password(&self.password)?;
        if self.password != self.confirm_password {
            return Err(AppError::bad_request("passwords do not match"));
        }
        Ok(())
    }
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: &'static str,
}
