const TIMESTAMP_FIELDS: &[&str] = &[
    ".tracker.v1.User.activated_at",
    ".tracker.v1.User.created_at",
    ".tracker.v1.User.deleted_at",
    ".tracker.v1.Group.created_at",
    ".tracker.v1.Group.deleted_at",
    ".tracker.v1.Ticket.created_at",
    ".tracker.v1.Ticket.updated_at",
];

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut builder = tonic_build::configure()
        .build_server(true)
        .build_client(true)
        .emit_rerun_if_changed(true)
        // JSON shape for the HTTP gateway: lowerCamelCase names, every field
        // emitted, missing fields defaulted on decode.
        .type_attribute(
            ".tracker.v1",
            "#[derive(serde::Serialize, serde::Deserialize)] #[serde(rename_all = \"camelCase\", default)]",
        );

    for field in TIMESTAMP_FIELDS {
        builder = builder.field_attribute(
            field,
            "#[serde(with = \"crate::gateway::timestamp\")]",
        );
    }

    builder.compile_protos(&["proto/tracker/v1/service.proto"], &["proto"])?;

    Ok(())
}
