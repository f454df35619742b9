use anyhow::{Context, Result};
use clap::Parser;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info};

use receiver::audio::AudioPlayer;
use receiver::{
    ClockSource, FeProfile, FecScheme, Frame, NetworkConfig, PacketReceiver, Receiver,
    ReceiverConfig,
};
use rtp_mix_common::time::MILLISECOND;
use rtp_mix_common::{init_tracing, ColorWhen, MetricsContext, MetricsServerConfig, SampleSpec};

#[derive(Parser, Debug)]
#[command(author, version, about = "Realtime RTP audio receiver", long_about = None)]
struct Args {
    /// Address to listen on
    #[arg(short, long, default_value = "0.0.0.0:5004")]
    listen: SocketAddr,

    /// Multicast group to join
    #[arg(long)]
    multicast: Option<Ipv4Addr>,

    /// Output sample rate
    #[arg(long, default_value_t = 48000)]
    rate: u32,

    /// Output channels
    #[arg(long, default_value_t = 2)]
    channels: u16,

    /// Output frame length in milliseconds
    #[arg(long, default_value_t = 10)]
    frame_ms: u32,

    /// Target latency in milliseconds
    #[arg(long, default_value_t = 200)]
    target_latency_ms: u32,

    /// Enable Reed-Solomon FEC (must match the sender)
    #[arg(long)]
    fec: bool,

    /// Rate adaptation profile: responsive, balanced, smooth
    #[arg(long, default_value = "balanced")]
    profile: String,

    /// Disable rate adaptation
    #[arg(long)]
    no_rate_adaptation: bool,

    /// Write received audio to a WAV file
    #[arg(long)]
    wav: Option<PathBuf>,

    /// Disable speaker playback
    #[arg(long)]
    no_playback: bool,

    /// Serve Prometheus metrics on this address
    #[arg(long)]
    metrics: Option<SocketAddr>,

    /// ANSI color: auto, always, never
    #[arg(long, default_value = "auto")]
    color: String,
}

fn parse_profile(s: &str) -> Result<FeProfile> {
    // ---
    match s {
        "responsive" => Ok(FeProfile::Responsive),
        "balanced" => Ok(FeProfile::Balanced),
        "smooth" => Ok(FeProfile::Smooth),
        other => anyhow::bail!("unknown profile: {other}"),
    }
}

fn build_config(args: &Args) -> Result<ReceiverConfig> {
    // ---
    let output_spec = SampleSpec::new(args.rate, args.channels);

    let mut cfg = ReceiverConfig::default();
    cfg.output_sample_spec = output_spec;
    cfg.clock_source = ClockSource::Internal;
    cfg.session.input_sample_spec = output_spec;
    cfg.session.target_latency = args.target_latency_ms as i64 * MILLISECOND;
    cfg.session.min_latency = -cfg.session.target_latency;
    cfg.session.max_latency = 2 * cfg.session.target_latency;
    cfg.session.fe_enable = !args.no_rate_adaptation;
    cfg.session.fe_profile = parse_profile(&args.profile)?;
    if args.fec {
        cfg.session.fec.scheme = FecScheme::ReedSolomon8;
    }
    Ok(cfg)
}

#[tokio::main]
async fn main() -> Result<()> {
    // ---
    let args = Args::parse();
    let color: ColorWhen = args.color.parse()?;
    init_tracing(color)?;

    info!("starting RTP audio receiver");
    info!("listening on: {}", args.listen);

    let output_spec = SampleSpec::new(args.rate, args.channels);
    let cfg = build_config(&args)?;

    let metrics = match args.metrics {
        Some(bind) => {
            let ctx = MetricsContext::new("receiver")?;
            ctx.spawn_metrics_server(MetricsServerConfig::new(bind));
            info!("metrics served on http://{bind}/metrics");
            Some(ctx)
        }
        None => None,
    };

    let net_cfg = NetworkConfig {
        bind: args.listen,
        multicast_group: args.multicast,
        max_packet_size: cfg.max_packet_size,
        ..NetworkConfig::default()
    };

    let mut rx_pipeline = Receiver::with_metrics(cfg, metrics)?;
    let router = rx_pipeline.router();
    let mut packet_rx = PacketReceiver::bind(&net_cfg).await?;

    tokio::spawn(async move {
        // ---
        if let Err(e) = receiver::receive_loop(&mut packet_rx, router).await {
            error!("network loop failed: {e:#}");
        }
    });

    let frame_samples =
        (args.rate as usize * args.frame_ms as usize / 1000) * args.channels as usize;

    let running = Arc::new(AtomicBool::new(true));
    let flag = running.clone();
    let no_playback = args.no_playback;
    let wav_path = args.wav.clone();
    let wav_spec = hound::WavSpec {
        channels: args.channels,
        sample_rate: args.rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    // The cpal stream is not Send, so the player lives entirely on the
    // pull thread.
    let pull = std::thread::spawn(move || -> Result<()> {
        // ---
        let mut player = if no_playback {
            None
        } else {
            Some(AudioPlayer::new(output_spec).context("audio playback init failed")?)
        };
        let mut wav = match &wav_path {
            Some(path) => Some(
                hound::WavWriter::create(path, wav_spec)
                    .with_context(|| format!("failed to create {}", path.display()))?,
            ),
            None => None,
        };

        let mut frame = Frame::new(frame_samples);
        while flag.load(Ordering::Relaxed) {
            rx_pipeline.read(&mut frame)?;

            if let Some(p) = player.as_mut() {
                p.play(frame.samples());
            }
            if let Some(w) = wav.as_mut() {
                for &s in frame.samples() {
                    w.write_sample((s.clamp(-1.0, 1.0) * 32767.0) as i16)?;
                }
            }
        }

        rx_pipeline.close();
        if let Some(w) = wav {
            w.finalize()?;
        }
        Ok(())
    });

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    running.store(false, Ordering::Relaxed);
    pull.join().expect("pull thread panicked")?;

    Ok(())
}
