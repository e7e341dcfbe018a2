//! Replay a WAV file through the VAD and print confirmed speech boundaries.
//!
//! Useful for tuning `[vad]` thresholds against recorded audio.

use std::path::PathBuf;
use tokio::sync::mpsc;
use xiaot::AssistantConfig;
use xiaot::audio::{CaptureSource, Pacing, WavCapture};
use xiaot::vad::{VadEngine, VadTransition};

fn main() {
    xiaot::diagnostics::init_tracing("xiaot=warn");
    if let Err(e) = run() {
        eprintln!("xiaot-vad-replay failed: {e}");
        std::process::exit(1);
    }
}

#[tokio::main(flavor = "current_thread")]
async fn run() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().collect();
    let (wav, config) = match args.as_slice() {
        [_, wav] => (PathBuf::from(wav), AssistantConfig::default()),
        [_, wav, flag, path] if flag == "--config" || flag == "-c" => (
            PathBuf::from(wav),
            AssistantConfig::from_file(&PathBuf::from(path))?,
        ),
        _ => {
            println!("usage: xiaot-vad-replay <file.wav> [--config <path>]");
            return Ok(());
        }
    };

    let mut capture = WavCapture::new(&wav, &config.audio, Pacing::Burst);
    let (tx, mut rx) = mpsc::channel(256);
    capture.start(tx).await?;

    let mut vad = VadEngine::new(&config.vad);
    let mut segments = 0usize;
    let mut last_end = std::time::Duration::ZERO;
    while let Some(frame) = rx.recv().await {
        last_end = frame.end();
        match vad.feed(&frame).transition {
            Some(VadTransition::SpeechStart { segment }) => {
                println!("speech start at {:.2}s", segment.start.as_secs_f32());
            }
            Some(VadTransition::SpeechEnd { segment }) => {
                segments += 1;
                let end = segment.end.unwrap_or(last_end);
                println!(
                    "speech end at {:.2}s ({:.2}s of speech)",
                    end.as_secs_f32(),
                    end.saturating_sub(segment.start).as_secs_f32()
                );
            }
            None => {}
        }
    }
    if let Some(open) = vad.open_segment() {
        println!(
            "speech still active at end of file (started {:.2}s)",
            open.start.as_secs_f32()
        );
    }
    println!(
        "{segments} segment(s) in {:.2}s of audio",
        last_end.as_secs_f32()
    );
    Ok(())
}
