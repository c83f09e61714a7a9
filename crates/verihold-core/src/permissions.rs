//! Membership permission bitmask (spec §3, `Membership.permissions`).

use crate::bitset::bitflags_like;

bitflags_like! {
    /// What a user's membership in a realm allows them to do. Stored as a
    /// single integer column on the membership row and checked with a
    /// bitwise AND rather than joined against a permissions table.
    Permission {
        READ_STATS = 0b0000_0001,
        WRITE_CODES = 0b0000_0010,
        READ_CODES = 0b0000_0100,
        ADMIN_REALM = 0b0000_1000,
        ADMIN_APPS = 0b0001_0000,
        ADMIN_USERS = 0b0010_0000,
    }
}

impl Permission {
    /// The permission set folded from a legacy boolean "is this user an
    /// admin of the realm" column (migration backfill, spec §4.7).
    pub fn from_legacy_admin_flag(is_admin: bool) -> Self {
        if is_admin {
            Permission::ADMIN_REALM
                | Permission::ADMIN_APPS
                | Permission::ADMIN_USERS
                | Permission::WRITE_CODES
                | Permission::READ_CODES
                | Permission::READ_STATS
        } else {
            Permission::READ_STATS | Permission::READ_CODES
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legacy_admin_flag_grants_everything() {
        let perms = Permission::from_legacy_admin_flag(true);
        assert!(perms.contains(Permission::ADMIN_REALM));
        assert!(perms.contains(Permission::WRITE_CODES));
    }

    #[test]
    fn legacy_non_admin_is_read_only() {
        let perms = Permission::from_legacy_admin_flag(false);
        assert!(perms.contains(Permission::READ_STATS));
        assert!(!perms.contains(Permission::ADMIN_REALM));
        assert!(!perms.contains(Permission::WRITE_CODES));
    }

    #[test]
    fn union_combines_bits() {
        let perms = Permission::READ_STATS | Permission::WRITE_CODES;
        assert!(perms.contains(Permission::READ_STATS));
        assert!(perms.contains(Permission::WRITE_CODES));
        assert!(!perms.contains(Permission::ADMIN_REALM));
    }
}
