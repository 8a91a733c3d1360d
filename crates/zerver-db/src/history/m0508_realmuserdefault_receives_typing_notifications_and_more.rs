use crate::migration::Migration;
use crate::operations::Operation;
use crate::schema::Field;

pub(super) fn migration() -> Migration {
    Migration::new(super::APP_LABEL, "0508_realmuserdefault_receives_typing_notifications_and_more")
        .depends_on(super::APP_LABEL, "0507_rework_realm_upload_quota_gb")
        .operation(Operation::add_field(
            "realmuserdefault",
            "receives_typing_notifications",
            Field::boolean(true),
        ))
        .operation(Operation::add_field(
            "userprofile",
            "receives_typing_notifications",
            Field::boolean(true),
        ))
}
