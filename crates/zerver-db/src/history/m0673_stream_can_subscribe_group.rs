use crate::migration::Migration;
use crate::operations::Operation;
use crate::schema::{Field, OnDelete};

pub(super) fn migration() -> Migration {
    Migration::new(super::APP_LABEL, "0673_stream_can_subscribe_group")
        .depends_on(super::APP_LABEL, "0672_fix_attachment_realm")
        .operation(Operation::add_field(
            "stream",
            "can_subscribe_group",
            Field::foreign_key("usergroup", OnDelete::Restrict)
                .null(true)
                .related_name("+"),
        ))
}
