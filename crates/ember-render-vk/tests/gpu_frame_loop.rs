// SPDX-License-Identifier: CEPL-1.0
//! Needs a Vulkan 1.3 GPU and a display. `cargo test -- --ignored`.
//!
//! winit allows one event loop per process, so the whole loop is exercised
//! from a single test.

use ember_render::{FrameStatus, RenderSize, Renderer};
use ember_render_vk::{EngineConfig, VkRenderer, MAX_FRAMES_IN_FLIGHT};
use winit::event_loop::EventLoop;
use winit::window::Window;

fn event_loop() -> EventLoop<()> {
    let mut builder = EventLoop::builder();
    #[cfg(all(unix, not(target_os = "macos")))]
    {
        use winit::platform::x11::EventLoopBuilderExtX11;
        builder.with_any_thread(true);
    }
    builder.build().expect("event loop")
}

#[test]
#[ignore = "needs a GPU and a display"]
fn frame_loop_end_to_end() {
    ember_core::init_tracing();
    let el = event_loop();
    #[allow(deprecated)]
    let window = el
        .create_window(
            Window::default_attributes()
                .with_visible(false)
                .with_inner_size(winit::dpi::PhysicalSize::new(640, 480)),
        )
        .expect("window");

    let cfg = EngineConfig {
        pipeline_cache: false,
        // missing files fall back to the generated mesh and checkerboard
        model_path: "does/not/exist.obj".into(),
        texture_path: "does/not/exist.png".into(),
        ..EngineConfig::default()
    };
    let mut r = VkRenderer::with_config(&window, &window, RenderSize::new(640, 480), cfg)
        .expect("renderer");

    let images = r.swapchain_image_count();
    assert_eq!(r.swapchain_view_count(), images);
    assert_eq!(r.semaphore_slot_count(), images);

    // counters wrap independently; slots in flight never exceed the bound
    let mut presented = 0;
    for _ in 0..(images * MAX_FRAMES_IN_FLIGHT * 3) {
        let frame = r.frame_index();
        let sem = r.semaphore_index();
        match r.render().expect("render") {
            FrameStatus::Presented => {
                presented += 1;
                assert_eq!(r.frame_index(), (frame + 1) % MAX_FRAMES_IN_FLIGHT);
                assert_eq!(r.semaphore_index(), (sem + 1) % r.semaphore_slot_count());
            }
            FrameStatus::Recreated => assert_eq!(r.semaphore_index(), 0),
            FrameStatus::Skipped => unreachable!("window is not zero-sized"),
        }
        assert!(r.slots_in_flight() <= MAX_FRAMES_IN_FLIGHT);
    }
    assert!(presented > 0);

    // recreation swaps every view and resets the semaphore cycle
    assert_eq!(r.force_recreate().expect("recreate"), FrameStatus::Recreated);
    assert_eq!(r.swapchain_view_count(), r.swapchain_image_count());
    assert_eq!(r.semaphore_slot_count(), r.swapchain_image_count());
    assert_eq!(r.semaphore_index(), 0);
    assert_eq!(r.slots_in_flight(), 0);

    // zero-sized framebuffer: nothing is drawn until it grows back
    r.resize(RenderSize::new(0, 0)).expect("resize");
    assert_eq!(r.render().expect("render"), FrameStatus::Skipped);
    assert_eq!(r.force_recreate().expect("recreate"), FrameStatus::Skipped);

    r.resize(RenderSize::new(640, 480)).expect("resize");
    assert_eq!(r.render().expect("render"), FrameStatus::Recreated);
    for _ in 0..4 {
        assert_ne!(r.render().expect("render"), FrameStatus::Skipped);
    }

    // dropping waits for the device before releasing anything
    drop(r);
}
