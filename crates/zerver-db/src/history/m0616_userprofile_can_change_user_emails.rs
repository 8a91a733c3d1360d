use crate::migration::Migration;
use crate::operations::Operation;
use crate::schema::Field;

pub(super) fn migration() -> Migration {
    Migration::new(super::APP_LABEL, "0616_userprofile_can_change_user_emails")
        .depends_on(super::APP_LABEL, "0615_system_bot_avatars")
        .operation(Operation::add_field(
            "userprofile",
            "can_change_user_emails",
            Field::boolean(false).db_index(true),
        ))
}
