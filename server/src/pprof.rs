//! CPU profiling handlers backed by the `pprof` crate.
//!
//! Examples:
//!
//! curl -sSL "http://HOST:PORT/debug/pprof/profile?seconds=10&frequency=200" > profile.pb.gz
//!
//! curl -sSL "http://HOST:PORT/debug/pprof/flamegraph?seconds=10&image_width=2500" > flamegraph.svg.gz

use std::io::Write;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::{
    extract::Query,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use flate2::{write::GzEncoder, Compression};
use pprof::{flamegraph::Options, protos::Message, ProfilerGuardBuilder};
use serde::Deserialize;
use tokio::time::sleep;

const DEFAULT_SECONDS: u64 = 10;
const DEFAULT_FREQUENCY: i32 = 200;
const DEFAULT_IMAGE_WIDTH: usize = 2500;

#[derive(Deserialize)]
pub struct ProfileParams {
    /// Seconds to sample before building the report.
    pub seconds: Option<u64>,
    /// Sample frequency in Hz.
    pub frequency: Option<i32>,
    /// Flamegraph SVG width in pixels.
    pub image_width: Option<usize>,
}

pub async fn handle_profile_report(
    Query(params): Query<ProfileParams>,
) -> Result<Response, Response> {
    let seconds = params.seconds.unwrap_or(DEFAULT_SECONDS);
    let frequency = params.frequency.unwrap_or(DEFAULT_FREQUENCY);

    match generate_report(frequency, seconds).await {
        Ok(body) => Ok((
            StatusCode::OK,
            [("Content-Type", "application/octet-stream")],
            body,
        )
            .into_response()),
        Err(err) => Err((
            StatusCode::INTERNAL_SERVER_ERROR,
            [("Content-Type", "text/plain")],
            err.to_string(),
        )
            .into_response()),
    }
}

pub async fn handle_profile_flamegraph(
    Query(params): Query<ProfileParams>,
) -> Result<Response, Response> {
    let seconds = params.seconds.unwrap_or(DEFAULT_SECONDS);
    let frequency = params.frequency.unwrap_or(DEFAULT_FREQUENCY);
    let image_width = params.image_width.unwrap_or(DEFAULT_IMAGE_WIDTH);

    match generate_flamegraph(frequency, seconds, image_width).await {
        Ok(body) => Ok((
            StatusCode::OK,
            [("Content-Type", "application/octet-stream")],
            body,
        )
            .into_response()),
        Err(err) => Err((
            StatusCode::INTERNAL_SERVER_ERROR,
            [("Content-Type", "text/plain")],
            err.to_string(),
        )
            .into_response()),
    }
}

async fn generate_report(frequency: i32, seconds: u64) -> Result<Vec<u8>> {
    let guard = ProfilerGuardBuilder::default()
        .frequency(frequency)
        .blocklist(&["libc", "libgcc", "pthread", "vdso"])
        .build()
        .context("failed to build profiler guard")?;

    sleep(Duration::from_secs(seconds)).await;

    let profile = guard
        .report()
        .build()
        .context("failed to build profiler report")?
        .pprof()
        .context("failed to build pprof profile")?;

    let mut body = Vec::new();
    let mut encoder = GzEncoder::new(&mut body, Compression::default());
    profile
        .write_to_writer(&mut encoder)
        .context("failed to encode profile")?;
    encoder.finish().context("failed to finish gzip stream")?;

    Ok(body)
}

async fn generate_flamegraph(frequency: i32, seconds: u64, image_width: usize) -> Result<Vec<u8>> {
    let guard = ProfilerGuardBuilder::default()
        .frequency(frequency)
        .blocklist(&["libc", "libgcc", "pthread", "vdso"])
        .build()
        .context("failed to build profiler guard")?;

    sleep(Duration::from_secs(seconds)).await;

    let mut options = Options::default();
    options.image_width = Some(image_width);
    let mut svg = Vec::new();
    guard
        .report()
        .build()
        .context("failed to build flamegraph report")?
        .flamegraph_with_options(&mut svg, &mut options)
        .context("failed to render flamegraph")?;

    let mut body = Vec::new();
    let mut encoder = GzEncoder::new(&mut body, Compression::default());
    encoder
        .write_all(&svg)
        .context("failed to encode flamegraph")?;
    encoder.finish().context("failed to finish gzip stream")?;

    Ok(body)
}
