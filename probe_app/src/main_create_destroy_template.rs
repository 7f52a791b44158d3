//! Descriptor update template creation and destruction

fn main() {
    vk_sandbox::entry::run(
        "create_destroy_descriptor_update_template",
        probe_app::template_create_destroy::run,
    );
}
