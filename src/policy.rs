//! Password Policy Codec
//!
//! Parse and emit the flat space-separated `key=value` policy string the
//! directory stores per user and globally. The schema is fixed: 22 boolean
//! flags and 12 unsigned counters/timestamps, split into a global scope and
//! a user scope. `isAdminUser` is accepted on parse but never emitted.

use std::fmt::Write;

/// Longest accepted `key=value` token.
pub const POLICY_ITEM_MAX: usize = 128;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PolicyError {
    #[error("policy item exceeds {POLICY_ITEM_MAX} bytes")]
    ItemTooLong,
    #[error("policy item has no '=' separator")]
    MissingSeparator,
    #[error("unknown policy key '{0}'")]
    UnknownKey(String),
    #[error("policy string does not fit in the output buffer")]
    Overflow,
}

/// Which view of the policy to serialize.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyScope {
    /// Global fields only.
    Global,
    /// Global fields followed by the per-user fields.
    User,
}

// Wire keys. `canModifyPasswordforSelf` is spelled with a lowercase 'f'
// on the wire; existing directory records depend on it.
const K_USING_HISTORY: &str = "usingHistory";
const K_CAN_MODIFY_PASSWORD_FOR_SELF: &str = "canModifyPasswordforSelf";
const K_USING_EXPIRATION_DATE: &str = "usingExpirationDate";
const K_USING_HARD_EXPIRATION_DATE: &str = "usingHardExpirationDate";
const K_REQUIRES_ALPHA: &str = "requiresAlpha";
const K_REQUIRES_NUMERIC: &str = "requiresNumeric";
const K_PASSWORD_CANNOT_BE_NAME: &str = "passwordCannotBeName";
const K_REQUIRES_MIXED_CASE: &str = "requiresMixedCase";
const K_REQUIRES_SYMBOL: &str = "requiresSymbol";
const K_NEW_PASSWORD_REQUIRED: &str = "newPasswordRequired";
const K_NOT_GUESSABLE_PATTERN: &str = "notGuessablePattern";

const K_EXPIRATION_DATE_GMT: &str = "expirationDateGMT";
const K_HARD_EXPIRE_DATE_GMT: &str = "hardExpireDateGMT";
const K_MAX_MINUTES_UNTIL_CHANGE_PASSWORD: &str = "maxMinutesUntilChangePassword";
const K_MAX_MINUTES_UNTIL_DISABLED: &str = "maxMinutesUntilDisabled";
const K_MAX_MINUTES_OF_NON_USE: &str = "maxMinutesOfNonUse";
const K_MAX_FAILED_LOGIN_ATTEMPTS: &str = "maxFailedLoginAttempts";
const K_MIN_CHARS: &str = "minChars";
const K_MAX_CHARS: &str = "maxChars";
const K_MINUTES_UNTIL_FAILED_LOGIN_RESET: &str = "minutesUntilFailedLoginReset";

const K_IS_DISABLED: &str = "isDisabled";
const K_IS_ADMIN_USER: &str = "isAdminUser";
const K_IS_SESSION_KEY_AGENT: &str = "isSessionKeyAgent";
const K_IS_COMPUTER_ACCOUNT: &str = "isComputerAccount";
const K_ADMIN_CLASS: &str = "adminClass";
const K_ADMIN_NO_CHANGE_PASSWORDS: &str = "adminNoChangePasswords";
const K_ADMIN_NO_SET_POLICIES: &str = "adminNoSetPolicies";
const K_ADMIN_NO_CREATE: &str = "adminNoCreate";
const K_ADMIN_NO_DELETE: &str = "adminNoDelete";
const K_ADMIN_NO_CLEAR_STATE: &str = "adminNoClearState";
const K_ADMIN_NO_PROMOTE_ADMINS: &str = "adminNoPromoteAdmins";
const K_LOG_OFF_TIME: &str = "logOffTime";
const K_KICK_OFF_TIME: &str = "kickOffTime";
const K_LAST_LOGIN_TIME: &str = "lastLoginTime";
const K_PASSWORD_LAST_SET_TIME: &str = "passwordLastSetTime";

/// The fixed-schema policy record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PasswordPolicy {
    pub using_history: bool,
    pub can_modify_password_for_self: bool,
    pub using_expiration_date: bool,
    pub using_hard_expiration_date: bool,
    pub requires_alpha: bool,
    pub requires_numeric: bool,
    pub password_cannot_be_name: bool,
    pub requires_mixed_case: bool,
    pub requires_symbol: bool,
    pub new_password_required: bool,
    pub not_guessable_pattern: bool,

    pub expiration_date_gmt: u64,
    pub hard_expire_date_gmt: u64,
    pub max_minutes_until_change_password: u64,
    pub max_minutes_until_disabled: u64,
    pub max_minutes_of_non_use: u64,
    pub max_failed_login_attempts: u64,
    pub min_chars: u64,
    pub max_chars: u64,
    pub minutes_until_failed_login_reset: u64,

    pub is_disabled: bool,
    pub is_admin_user: bool,
    pub is_session_key_agent: bool,
    pub is_computer_account: bool,
    pub admin_class: bool,
    pub admin_no_change_passwords: bool,
    pub admin_no_set_policies: bool,
    pub admin_no_create: bool,
    pub admin_no_delete: bool,
    pub admin_no_clear_state: bool,
    pub admin_no_promote_admins: bool,

    pub log_off_time: u64,
    pub kick_off_time: u64,
    pub last_login_time: u64,
    pub password_last_set_time: u64,
}

impl Default for PasswordPolicy {
    fn default() -> Self {
        Self {
            using_history: false,
            can_modify_password_for_self: false,
            using_expiration_date: false,
            using_hard_expiration_date: false,
            requires_alpha: false,
            requires_numeric: false,
            password_cannot_be_name: false,
            requires_mixed_case: false,
            requires_symbol: false,
            new_password_required: false,
            not_guessable_pattern: false,
            // "never expires" on the wire
            expiration_date_gmt: u64::MAX,
            hard_expire_date_gmt: u64::MAX,
            max_minutes_until_change_password: 0,
            max_minutes_until_disabled: 0,
            max_minutes_of_non_use: 0,
            max_failed_login_attempts: 0,
            min_chars: 0,
            max_chars: 0,
            minutes_until_failed_login_reset: 0,
            is_disabled: false,
            is_admin_user: false,
            is_session_key_agent: false,
            is_computer_account: false,
            admin_class: false,
            admin_no_change_passwords: false,
            admin_no_set_policies: false,
            admin_no_create: false,
            admin_no_delete: false,
            admin_no_clear_state: false,
            admin_no_promote_admins: false,
            log_off_time: 0,
            kick_off_time: 0,
            last_login_time: 0,
            password_last_set_time: 0,
        }
    }
}

impl PasswordPolicy {
    /// Parse a policy string into a fresh record (defaults applied first).
    pub fn parse(policy_string: &str) -> Result<Self, PolicyError> {
        let mut policy = Self::default();
        policy.parse_into(policy_string)?;
        Ok(policy)
    }

    /// Parse a policy string into an existing record.
    pub fn parse_into(&mut self, policy_string: &str) -> Result<(), PolicyError> {
        for item in policy_string.split(' ').filter(|t| !t.is_empty()) {
            if item.len() >= POLICY_ITEM_MAX {
                return Err(PolicyError::ItemTooLong);
            }
            let (key, value) = item.split_once('=').ok_or(PolicyError::MissingSeparator)?;
            self.parse_item(key, value)?;
        }
        Ok(())
    }

    fn parse_item(&mut self, key: &str, value: &str) -> Result<(), PolicyError> {
        // A boolean is true iff the value starts with '1'.
        let flag = value.starts_with('1');
        let number = parse_u64_prefix(value);

        match key {
            K_USING_HISTORY => self.using_history = flag,
            K_CAN_MODIFY_PASSWORD_FOR_SELF => self.can_modify_password_for_self = flag,
            K_USING_EXPIRATION_DATE => self.using_expiration_date = flag,
            K_USING_HARD_EXPIRATION_DATE => self.using_hard_expiration_date = flag,
            K_REQUIRES_ALPHA => self.requires_alpha = flag,
            K_REQUIRES_NUMERIC => self.requires_numeric = flag,
            K_PASSWORD_CANNOT_BE_NAME => self.password_cannot_be_name = flag,
            K_REQUIRES_MIXED_CASE => self.requires_mixed_case = flag,
            K_REQUIRES_SYMBOL => self.requires_symbol = flag,
            K_NEW_PASSWORD_REQUIRED => self.new_password_required = flag,
            K_NOT_GUESSABLE_PATTERN => self.not_guessable_pattern = flag,
            K_EXPIRATION_DATE_GMT => self.expiration_date_gmt = number,
            K_HARD_EXPIRE_DATE_GMT => self.hard_expire_date_gmt = number,
            K_MAX_MINUTES_UNTIL_CHANGE_PASSWORD => self.max_minutes_until_change_password = number,
            K_MAX_MINUTES_UNTIL_DISABLED => self.max_minutes_until_disabled = number,
            K_MAX_MINUTES_OF_NON_USE => self.max_minutes_of_non_use = number,
            K_MAX_FAILED_LOGIN_ATTEMPTS => self.max_failed_login_attempts = number,
            K_MIN_CHARS => self.min_chars = number,
            K_MAX_CHARS => self.max_chars = number,
            K_MINUTES_UNTIL_FAILED_LOGIN_RESET => self.minutes_until_failed_login_reset = number,
            K_IS_DISABLED => self.is_disabled = flag,
            K_IS_ADMIN_USER => self.is_admin_user = flag,
            K_IS_SESSION_KEY_AGENT => self.is_session_key_agent = flag,
            K_IS_COMPUTER_ACCOUNT => self.is_computer_account = flag,
            K_ADMIN_CLASS => self.admin_class = flag,
            K_ADMIN_NO_CHANGE_PASSWORDS => self.admin_no_change_passwords = flag,
            K_ADMIN_NO_SET_POLICIES => self.admin_no_set_policies = flag,
            K_ADMIN_NO_CREATE => self.admin_no_create = flag,
            K_ADMIN_NO_DELETE => self.admin_no_delete = flag,
            K_ADMIN_NO_CLEAR_STATE => self.admin_no_clear_state = flag,
            K_ADMIN_NO_PROMOTE_ADMINS => self.admin_no_promote_admins = flag,
            K_LOG_OFF_TIME => self.log_off_time = number,
            K_KICK_OFF_TIME => self.kick_off_time = number,
            K_LAST_LOGIN_TIME => self.last_login_time = number,
            K_PASSWORD_LAST_SET_TIME => self.password_last_set_time = number,
            _ => return Err(PolicyError::UnknownKey(key.to_string())),
        }

        Ok(())
    }

    /// Serialize in the fixed wire order. User-scope fields are appended
    /// only for [`PolicyScope::User`]. No trailing space. Fails with
    /// [`PolicyError::Overflow`] if the result exceeds `max_len` bytes.
    pub fn to_wire(&self, scope: PolicyScope, max_len: usize) -> Result<String, PolicyError> {
        let mut out = String::new();

        let global_flags: [(&str, bool); 11] = [
            (K_USING_HISTORY, self.using_history),
            (K_CAN_MODIFY_PASSWORD_FOR_SELF, self.can_modify_password_for_self),
            (K_USING_EXPIRATION_DATE, self.using_expiration_date),
            (K_USING_HARD_EXPIRATION_DATE, self.using_hard_expiration_date),
            (K_REQUIRES_ALPHA, self.requires_alpha),
            (K_REQUIRES_NUMERIC, self.requires_numeric),
            (K_PASSWORD_CANNOT_BE_NAME, self.password_cannot_be_name),
            (K_REQUIRES_MIXED_CASE, self.requires_mixed_case),
            (K_REQUIRES_SYMBOL, self.requires_symbol),
            (K_NEW_PASSWORD_REQUIRED, self.new_password_required),
            (K_NOT_GUESSABLE_PATTERN, self.not_guessable_pattern),
        ];
        let global_numbers: [(&str, u64); 9] = [
            (K_EXPIRATION_DATE_GMT, self.expiration_date_gmt),
            (K_HARD_EXPIRE_DATE_GMT, self.hard_expire_date_gmt),
            (
                K_MAX_MINUTES_UNTIL_CHANGE_PASSWORD,
                self.max_minutes_until_change_password,
            ),
            (K_MAX_MINUTES_UNTIL_DISABLED, self.max_minutes_until_disabled),
            (K_MAX_MINUTES_OF_NON_USE, self.max_minutes_of_non_use),
            (K_MAX_FAILED_LOGIN_ATTEMPTS, self.max_failed_login_attempts),
            (K_MIN_CHARS, self.min_chars),
            (K_MAX_CHARS, self.max_chars),
            (
                K_MINUTES_UNTIL_FAILED_LOGIN_RESET,
                self.minutes_until_failed_login_reset,
            ),
        ];

        for (key, flag) in global_flags {
            let _ = write!(out, "{key}={} ", flag as u8);
        }
        for (key, number) in global_numbers {
            let _ = write!(out, "{key}={number} ");
        }

        if scope == PolicyScope::User {
            // isAdminUser is intentionally absent from the emitted form.
            let user_flags: [(&str, bool); 10] = [
                (K_IS_DISABLED, self.is_disabled),
                (K_IS_SESSION_KEY_AGENT, self.is_session_key_agent),
                (K_IS_COMPUTER_ACCOUNT, self.is_computer_account),
                (K_ADMIN_CLASS, self.admin_class),
                (K_ADMIN_NO_CHANGE_PASSWORDS, self.admin_no_change_passwords),
                (K_ADMIN_NO_SET_POLICIES, self.admin_no_set_policies),
                (K_ADMIN_NO_CREATE, self.admin_no_create),
                (K_ADMIN_NO_DELETE, self.admin_no_delete),
                (K_ADMIN_NO_CLEAR_STATE, self.admin_no_clear_state),
                (K_ADMIN_NO_PROMOTE_ADMINS, self.admin_no_promote_admins),
            ];
            let user_numbers: [(&str, u64); 4] = [
                (K_LOG_OFF_TIME, self.log_off_time),
                (K_KICK_OFF_TIME, self.kick_off_time),
                (K_LAST_LOGIN_TIME, self.last_login_time),
                (K_PASSWORD_LAST_SET_TIME, self.password_last_set_time),
            ];

            for (key, flag) in user_flags {
                let _ = write!(out, "{key}={} ", flag as u8);
            }
            for (key, number) in user_numbers {
                let _ = write!(out, "{key}={number} ");
            }
        }

        if out.ends_with(' ') {
            out.pop();
        }
        if out.len() > max_len {
            return Err(PolicyError::Overflow);
        }

        Ok(out)
    }
}

/// Parse the leading decimal digits of `value`, saturating at `u64::MAX`.
/// Trailing junk is ignored; no digits at all yields zero.
fn parse_u64_prefix(value: &str) -> u64 {
    let mut n: u64 = 0;
    for b in value.bytes() {
        if !b.is_ascii_digit() {
            break;
        }
        n = n
            .saturating_mul(10)
            .saturating_add(u64::from(b - b'0'));
    }
    n
}
