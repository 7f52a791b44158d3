//! Layered rendering sample

use probe_app::layered_render::LayeredRenderSample;

fn main() {
    vk_sandbox::entry::run_sample::<LayeredRenderSample>("render_3d_image");
}
