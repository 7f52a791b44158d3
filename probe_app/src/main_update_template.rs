//! Descriptor set update through an update template

fn main() {
    vk_sandbox::entry::run(
        "update_descriptor_set_with_template",
        probe_app::template_update::run,
    );
}
