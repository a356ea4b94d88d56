//! Records one stereo compositor frame on the in-memory backend and prints
//! the resulting command stream.

use std::error::Error;

use render_compute::{
    ComputeContext, Fov, GpuTimestamps, LayerImages, NormalizedRect, Pose, ProjectionView,
    SampledImage, TargetImage, TimewarpView, ViewportData,
    glam::Quat,
    testing::{RecordingBackend, mock_resources},
};
use tracing::info;

fn init_tracing() {
    let default_filter = "error,render_compute=info,example=info";
    let filter = match tracing_subscriber::EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => match tracing_subscriber::EnvFilter::try_new(default_filter) {
            Ok(filter) => filter,
            Err(_) => tracing_subscriber::EnvFilter::new("error"),
        },
    };

    let _ = tracing_subscriber::fmt()
        .pretty()
        .with_env_filter(filter)
        .with_span_events(tracing_subscriber::fmt::format::FmtSpan::CLOSE)
        .try_init();
}

fn sampled(backend: &RecordingBackend) -> SampledImage<RecordingBackend> {
    SampledImage::new(backend.create_handle(), backend.create_handle())
}

fn main() -> Result<(), Box<dyn Error>> {
    init_tracing();

    let resources = mock_resources(2);
    let backend = &resources.backend;

    let eye_width = 1440;
    let eye_height = 1600;
    let viewports = [
        ViewportData {
            x: 0,
            y: 0,
            width: eye_width,
            height: eye_height,
        },
        ViewportData {
            x: eye_width,
            y: 0,
            width: eye_width,
            height: eye_height,
        },
    ];
    let target: TargetImage<RecordingBackend> =
        TargetImage::new(backend.create_handle(), backend.create_handle());

    // Side-by-side eye buffer, each view reads its half.
    let eye_buffer = sampled(backend);
    let views = [
        ProjectionView {
            source: eye_buffer,
            src_norm_rect: NormalizedRect {
                x: 0.0,
                y: 0.0,
                w: 0.5,
                h: 1.0,
            },
            viewport: viewports[0],
        },
        ProjectionView {
            source: eye_buffer,
            src_norm_rect: NormalizedRect {
                x: 0.5,
                y: 0.0,
                w: 0.5,
                h: 1.0,
            },
            viewport: viewports[1],
        },
    ];

    let fov = Fov::symmetric(0.87, 0.92);
    let rendered_at = Pose {
        orientation: Quat::from_rotation_y(0.02),
        ..Pose::IDENTITY
    };
    let warps = [TimewarpView {
        src_pose: rendered_at,
        src_fov: fov,
        new_pose: Pose::IDENTITY,
    }; 2];

    let mut ctx = ComputeContext::new();
    ctx.init(&resources)?;

    let mut frame = ctx.begin()?;
    frame.clear(&viewports, target);
    for (slot, viewport) in viewports.iter().enumerate() {
        let layers = LayerImages::try_from_iter([sampled(backend), sampled(backend)])?;
        let layer_target: TargetImage<RecordingBackend> =
            TargetImage::new(backend.create_handle(), backend.create_handle());
        frame.layers(slot, backend.create_handle(), &layers, layer_target, viewport, true);
    }
    frame.projection_timewarp(&views, &warps, target);
    frame.end()?;

    for command in backend.commands() {
        info!("{command:?}");
    }

    // What a readback of the two queries would turn into.
    let timestamps = GpuTimestamps::from_queries([10_000, 160_000]);
    info!("GPU time: {:?}", timestamps.elapsed(1.0));

    ctx.fini();
    Ok(())
}
