//! Schema history of the `zerver` namespace.
//!
//! Migrations before 0508 were applied by earlier releases and live outside
//! this crate; the units here name them as dependencies only.

mod m0508_realmuserdefault_receives_typing_notifications_and_more;
mod m0616_userprofile_can_change_user_emails;
mod m0673_stream_can_subscribe_group;

use crate::migration::Migration;

pub const APP_LABEL: &str = "zerver";

/// Every migration unit shipped with this crate.
pub fn migrations() -> Vec<Migration> {
    vec![
        m0508_realmuserdefault_receives_typing_notifications_and_more::migration(),
        m0616_userprofile_can_change_user_emails::migration(),
        m0673_stream_can_subscribe_group::migration(),
    ]
}

#[cfg(test)]
mod tests {
    use super::{APP_LABEL, migrations};
    use crate::operations::Operation;
    use crate::schema::{ColumnDefault, FieldType, OnDelete};

    #[test]
    fn every_unit_depends_on_exactly_one_prior_unit() {
        for migration in migrations() {
            assert_eq!(migration.app_label, APP_LABEL);
            assert_eq!(migration.dependencies.len(), 1, "{}", migration.name);
            assert_eq!(migration.dependencies[0].app_label, APP_LABEL);
            assert!(migration.dependencies[0].name < migration.name);
        }
    }

    #[test]
    fn typing_notifications_default_to_true_on_both_tables() {
        let migration = &migrations()[0];
        assert_eq!(migration.dependencies[0].name, "0507_rework_realm_upload_quota_gb");

        let tables: Vec<&str> = migration.operations.iter().map(Operation::table).collect();
        assert_eq!(tables, ["realmuserdefault", "userprofile"]);
        for op in &migration.operations {
            let Operation::AddField { name, field, .. } = op;
            assert_eq!(name, "receives_typing_notifications");
            assert_eq!(field.field_type, FieldType::Boolean);
            assert_eq!(field.default, ColumnDefault::Bool(true));
            assert!(!field.db_index);
        }
    }

    #[test]
    fn can_change_user_emails_is_indexed_and_defaults_to_false() {
        let migration = &migrations()[1];
        assert_eq!(migration.dependencies[0].name, "0615_system_bot_avatars");

        let Operation::AddField { model_name, name, field } = &migration.operations[0];
        assert_eq!(model_name, "userprofile");
        assert_eq!(name, "can_change_user_emails");
        assert_eq!(field.default, ColumnDefault::Bool(false));
        assert!(field.db_index);
        assert!(!field.null);
    }

    #[test]
    fn can_subscribe_group_restricts_deletion_and_has_no_reverse_accessor() {
        let migration = &migrations()[2];
        assert_eq!(migration.dependencies[0].name, "0672_fix_attachment_realm");

        let Operation::AddField { model_name, name, field } = &migration.operations[0];
        assert_eq!(model_name, "stream");
        assert_eq!(name, "can_subscribe_group");
        assert!(field.null);
        assert_eq!(
            field.field_type,
            FieldType::ForeignKey {
                to: "usergroup".to_string(),
                on_delete: OnDelete::Restrict,
                related_name: Some("+".to_string()),
            }
        );
    }
}
