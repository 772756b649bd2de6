//! Role ARN helpers
//!
//! Roles are addressed either by the full `arn:<partition>:iam::<account>:role/<name>`
//! form or by the short `<account>:<name>` form used in configuration files.
//! Account ids are always rendered zero-padded to twelve digits.

use crate::error::{CommonError, Result};
use crate::MAX_ACCOUNT_ID;

/// Render a numeric account id as the canonical 12 digit string
pub fn account_id_to_string(id: i64) -> Result<String> {
    if id < 0 || id as u64 > MAX_ACCOUNT_ID {
        return Err(CommonError::InvalidAccountId(id.to_string()));
    }
    Ok(format!("{:012}", id))
}

/// Normalise a textual account id, restoring any stripped leading zeros
pub fn normalize_account_id(account_id: &str) -> Result<String> {
    let trimmed = account_id.trim();
    if trimmed.is_empty() || !trimmed.bytes().all(|b| b.is_ascii_digit()) {
        return Err(CommonError::InvalidAccountId(account_id.to_string()));
    }
    let id: u64 = trimmed
        .parse()
        .map_err(|_| CommonError::InvalidAccountId(account_id.to_string()))?;
    if id > MAX_ACCOUNT_ID {
        return Err(CommonError::InvalidAccountId(account_id.to_string()));
    }
    Ok(format!("{:012}", id))
}

/// Build the canonical ARN for a role
pub fn make_role_arn(account_id: &str, role_name: &str) -> Result<String> {
    if role_name.is_empty() {
        return Err(CommonError::InvalidArn(format!("{}:", account_id)));
    }
    Ok(format!(
        "arn:aws:iam::{}:role/{}",
        normalize_account_id(account_id)?,
        role_name
    ))
}

/// Split a role ARN (or `account:Role` shorthand) into account id and role name
pub fn parse_role_arn(arn: &str) -> Result<(String, String)> {
    let parts: Vec<&str> = arn.split(':').collect();
    match parts.as_slice() {
        [account, role] => {
            if role.is_empty() {
                return Err(CommonError::InvalidArn(arn.to_string()));
            }
            Ok((normalize_account_id(account)?, role.to_string()))
        }
        ["arn", _partition, "iam", "", account, resource] => {
            let role = resource
                .strip_prefix("role/")
                .and_then(|path| path.rsplit('/').next())
                .filter(|name| !name.is_empty())
                .ok_or_else(|| CommonError::InvalidArn(arn.to_string()))?;
            Ok((normalize_account_id(account)?, role.to_string()))
        }
        _ => Err(CommonError::InvalidArn(arn.to_string())),
    }
}

/// Canonicalise any accepted ARN form
pub fn normalize_role_arn(arn: &str) -> Result<String> {
    let (account, role) = parse_role_arn(arn)?;
    make_role_arn(&account, &role)
}
