//! Device memory commitment probe

fn main() {
    vk_sandbox::entry::run("memory_commitment", probe_app::memory_commitment::run);
}
