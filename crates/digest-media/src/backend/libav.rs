//! In-process fallback encoder over libav (ffmpeg-next).
//!
//! Video is decoded, decimated to the plan's frame rate, scaled and
//! re-encoded with libx264. Audio is decoded, resampled through an
//! `abuffer -> abuffersink` graph to what the AAC encoder accepts, and
//! re-encoded at the plan's audio bitrate.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use ffmpeg_next as ffmpeg;
use ffmpeg::{
    codec, decoder, encoder, filter, format, frame, media, software::scaling, ChannelLayout, Dictionary,
    Packet, Rational,
};
use tracing::info;

use super::TranscodeBackend;
use crate::error::{MediaError, MediaResult};
use crate::plan::{CompressionPlan, SourceGeometry};

#[derive(Debug, Clone, Default)]
pub struct LibavBackend;

impl LibavBackend {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl TranscodeBackend for LibavBackend {
    fn name(&self) -> &'static str {
        "libav"
    }

    fn is_available(&self) -> bool {
        ffmpeg::init().is_ok() && encoder::find(codec::Id::H264).is_some()
    }

    fn plan(&self, target_size_mb: f64, source: &SourceGeometry) -> CompressionPlan {
        CompressionPlan::with_ladder(target_size_mb, source)
    }

    async fn transcode(
        &self,
        input: &Path,
        output: &Path,
        plan: &CompressionPlan,
        _source: &SourceGeometry,
    ) -> MediaResult<()> {
        info!(
            backend = self.name(),
            width = plan.target_width,
            height = plan.target_height,
            fps = plan.target_fps,
            video_kbps = plan.video_kbps(),
            "Compressing video in-process"
        );
        let input: PathBuf = input.to_path_buf();
        let output: PathBuf = output.to_path_buf();
        let plan = plan.clone();

        tokio::task::spawn_blocking(move || encode(&input, &output, &plan))
            .await
            .map_err(|e| MediaError::internal(format!("libav task failed: {e}")))?
            .map_err(|e| MediaError::ffmpeg_failed(format!("libav transcode failed: {e}"), None, None))
    }
}

struct VideoPipe {
    decoder: decoder::Video,
    scaler: scaling::Context,
    encoder: encoder::Video,
    source_time_base: Rational,
    encoder_time_base: Rational,
    output_time_base: Rational,
    output_index: usize,
    fps: f64,
    next_slot: i64,
}

impl VideoPipe {
    /// Pull decoded frames, keep one per output slot, encode them.
    fn drain_decoded(&mut self, octx: &mut format::context::Output) -> Result<(), ffmpeg::Error> {
        let mut decoded = frame::Video::empty();
        while self.decoder.receive_frame(&mut decoded).is_ok() {
            let Some(ts) = decoded.timestamp() else { continue };
            let seconds = ts as f64 * f64::from(self.source_time_base);
            let slot = (seconds * self.fps).floor() as i64;
            if slot < self.next_slot {
                continue;
            }
            self.next_slot = slot + 1;

            let mut scaled = frame::Video::empty();
            self.scaler.run(&decoded, &mut scaled)?;
            scaled.set_pts(Some(slot));
            self.encoder.send_frame(&scaled)?;
            self.drain_encoded(octx)?;
        }
        Ok(())
    }

    fn drain_encoded(&mut self, octx: &mut format::context::Output) -> Result<(), ffmpeg::Error> {
        let mut packet = Packet::empty();
        while self.encoder.receive_packet(&mut packet).is_ok() {
            packet.set_stream(self.output_index);
            packet.rescale_ts(self.encoder_time_base, self.output_time_base);
            packet.write_interleaved(octx)?;
        }
        Ok(())
    }
}

struct AudioPipe {
    input_index: usize,
    output_index: usize,
    decoder: decoder::Audio,
    graph: filter::Graph,
    encoder: encoder::Audio,
    source_time_base: Rational,
    output_time_base: Rational,
}

impl AudioPipe {
    fn new(
        ist: &format::stream::Stream,
        octx: &mut format::context::Output,
        bitrate_kbps: u32,
        global_header: bool,
    ) -> Result<Self, ffmpeg::Error> {
        let decoder = codec::context::Context::from_parameters(ist.parameters())?
            .decoder()
            .audio()?;
        let aac = encoder::find(codec::Id::AAC)
            .ok_or(ffmpeg::Error::EncoderNotFound)?
            .audio()?;

        let mut ost = octx.add_stream(aac)?;
        let mut enc = codec::context::Context::from_parameters(ost.parameters())?
            .encoder()
            .audio()?;
        let layout = aac
            .channel_layouts()
            .map(|layouts| layouts.best(decoder.channel_layout().channels()))
            .unwrap_or(ChannelLayout::STEREO);
        let sample_format = aac
            .formats()
            .and_then(|mut formats| formats.next())
            .ok_or(ffmpeg::Error::InvalidData)?;
        let rate = decoder.rate() as i32;

        if global_header {
            enc.set_flags(codec::Flags::GLOBAL_HEADER);
        }
        enc.set_rate(rate);
        enc.set_channel_layout(layout);
        enc.set_format(sample_format);
        enc.set_bit_rate(bitrate_kbps as usize * 1000);
        enc.set_max_bit_rate(bitrate_kbps as usize * 1000);
        enc.set_time_base(Rational(1, rate));
        ost.set_time_base(Rational(1, rate));

        let encoder = enc.open_as(aac)?;
        ost.set_parameters(&encoder);
        let output_index = ost.index();

        let source_time_base = ist.time_base();
        let graph = resample_graph(&decoder, &encoder, source_time_base)?;

        Ok(Self {
            input_index: ist.index(),
            output_index,
            decoder,
            graph,
            encoder,
            source_time_base,
            output_time_base: Rational(1, rate),
        })
    }

    fn send_packet(&mut self, packet: &Packet, octx: &mut format::context::Output) -> Result<(), ffmpeg::Error> {
        self.decoder.send_packet(packet)?;
        self.drain_decoded(octx)
    }

    fn drain_decoded(&mut self, octx: &mut format::context::Output) -> Result<(), ffmpeg::Error> {
        let mut decoded = frame::Audio::empty();
        while self.decoder.receive_frame(&mut decoded).is_ok() {
            let ts = decoded.timestamp();
            decoded.set_pts(ts);
            self.graph
                .get("in")
                .ok_or(ffmpeg::Error::FilterNotFound)?
                .source()
                .add(&decoded)?;
            self.drain_filtered(octx)?;
        }
        Ok(())
    }

    fn drain_filtered(&mut self, octx: &mut format::context::Output) -> Result<(), ffmpeg::Error> {
        let mut filtered = frame::Audio::empty();
        loop {
            let pulled = self
                .graph
                .get("out")
                .ok_or(ffmpeg::Error::FilterNotFound)?
                .sink()
                .frame(&mut filtered);
            if pulled.is_err() {
                break;
            }
            self.encoder.send_frame(&filtered)?;
            self.drain_encoded(octx)?;
        }
        Ok(())
    }

    fn drain_encoded(&mut self, octx: &mut format::context::Output) -> Result<(), ffmpeg::Error> {
        let mut packet = Packet::empty();
        while self.encoder.receive_packet(&mut packet).is_ok() {
            packet.set_stream(self.output_index);
            packet.rescale_ts(self.source_time_base, self.output_time_base);
            packet.write_interleaved(octx)?;
        }
        Ok(())
    }

    fn finish(&mut self, octx: &mut format::context::Output) -> Result<(), ffmpeg::Error> {
        self.decoder.send_eof()?;
        self.drain_decoded(octx)?;
        self.graph
            .get("in")
            .ok_or(ffmpeg::Error::FilterNotFound)?
            .source()
            .flush()?;
        self.drain_filtered(octx)?;
        self.encoder.send_eof()?;
        self.drain_encoded(octx)
    }
}

/// Converts decoded samples to the encoder's format, layout and frame size.
fn resample_graph(
    decoder: &decoder::Audio,
    encoder: &encoder::Audio,
    time_base: Rational,
) -> Result<filter::Graph, ffmpeg::Error> {
    let mut graph = filter::Graph::new();
    let args = format!(
        "time_base={}:sample_rate={}:sample_fmt={}:channel_layout=0x{:x}",
        time_base,
        decoder.rate(),
        decoder.format().name(),
        decoder.channel_layout().bits()
    );
    let abuffer = filter::find("abuffer").ok_or(ffmpeg::Error::FilterNotFound)?;
    let abuffersink = filter::find("abuffersink").ok_or(ffmpeg::Error::FilterNotFound)?;
    graph.add(&abuffer, "in", &args)?;
    graph.add(&abuffersink, "out", "")?;

    {
        let mut out = graph.get("out").ok_or(ffmpeg::Error::FilterNotFound)?;
        out.set_sample_format(encoder.format());
        out.set_channel_layout(encoder.channel_layout());
        out.set_sample_rate(encoder.rate());
    }

    graph.output("in", 0)?.input("out", 0)?.parse("anull")?;
    graph.validate()?;

    let fixed_frame_size = encoder
        .codec()
        .map(|c| !c.capabilities().contains(codec::capabilities::Capabilities::VARIABLE_FRAME_SIZE))
        .unwrap_or(true);
    if fixed_frame_size {
        graph
            .get("out")
            .ok_or(ffmpeg::Error::FilterNotFound)?
            .sink()
            .set_frame_size(encoder.frame_size());
    }
    Ok(graph)
}

fn encode(input: &Path, output: &Path, plan: &CompressionPlan) -> Result<(), ffmpeg::Error> {
    ffmpeg::init()?;

    let mut ictx = format::input(&input)?;
    let mut octx = format::output(&output)?;
    let global_header = octx.format().flags().contains(format::Flags::GLOBAL_HEADER);

    let (video_index, source_time_base, decoder) = {
        let ist = ictx
            .streams()
            .best(media::Type::Video)
            .ok_or(ffmpeg::Error::StreamNotFound)?;
        let decoder = codec::context::Context::from_parameters(ist.parameters())?
            .decoder()
            .video()?;
        (ist.index(), ist.time_base(), decoder)
    };

    let fps = plan.target_fps.round().max(1.0) as i32;
    let encoder_time_base = Rational(1, fps);
    let bitrate = plan.video_kbps() as usize * 1000;

    let h264 = encoder::find(codec::Id::H264).ok_or(ffmpeg::Error::EncoderNotFound)?;
    let (output_index, encoder) = {
        let mut ost = octx.add_stream(h264)?;
        let mut enc = codec::context::Context::new_with_codec(h264)
            .encoder()
            .video()?;
        enc.set_width(plan.target_width);
        enc.set_height(plan.target_height);
        enc.set_format(format::Pixel::YUV420P);
        enc.set_time_base(encoder_time_base);
        enc.set_frame_rate(Some(Rational(fps, 1)));
        enc.set_bit_rate(bitrate);
        enc.set_max_bit_rate(bitrate);
        if global_header {
            enc.set_flags(codec::Flags::GLOBAL_HEADER);
        }
        let mut opts = Dictionary::new();
        opts.set("preset", plan.encoder_preset);
        let opened = enc.open_with(opts)?;
        ost.set_parameters(&opened);
        ost.set_time_base(encoder_time_base);
        (ost.index(), opened)
    };

    let mut audio = match ictx.streams().best(media::Type::Audio) {
        Some(ist) => Some(AudioPipe::new(&ist, &mut octx, plan.audio_bitrate_kbps, global_header)?),
        None => None,
    };

    octx.write_header()?;

    let stream_time_base = |octx: &format::context::Output, index: usize| {
        octx.stream(index)
            .map(|s| s.time_base())
            .ok_or(ffmpeg::Error::StreamNotFound)
    };
    let output_time_base = stream_time_base(&octx, output_index)?;
    // The muxer may rewrite stream time bases in write_header.
    if let Some(audio) = audio.as_mut() {
        audio.output_time_base = stream_time_base(&octx, audio.output_index)?;
    }

    let scaler = scaling::Context::get(
        decoder.format(),
        decoder.width(),
        decoder.height(),
        format::Pixel::YUV420P,
        plan.target_width,
        plan.target_height,
        scaling::Flags::BILINEAR,
    )?;

    let mut pipe = VideoPipe {
        decoder,
        scaler,
        encoder,
        source_time_base,
        encoder_time_base,
        output_time_base,
        output_index,
        fps: fps as f64,
        next_slot: 0,
    };

    for (stream, packet) in ictx.packets() {
        let index = stream.index();
        if index == video_index {
            pipe.decoder.send_packet(&packet)?;
            pipe.drain_decoded(&mut octx)?;
        } else if let Some(audio) = audio.as_mut().filter(|a| a.input_index == index) {
            audio.send_packet(&packet, &mut octx)?;
        }
    }

    pipe.decoder.send_eof()?;
    pipe.drain_decoded(&mut octx)?;
    pipe.encoder.send_eof()?;
    pipe.drain_encoded(&mut octx)?;
    if let Some(audio) = audio.as_mut() {
        audio.finish(&mut octx)?;
    }

    octx.write_trailer()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_audio_is_reencoded_at_plan_bitrate() {
        if which::which("ffmpeg").is_err() || !LibavBackend::new().is_available() {
            return;
        }
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("in.mp4");
        let output = dir.path().join("out.mp4");
        let status = std::process::Command::new("ffmpeg")
            .args(["-y", "-v", "error"])
            .args(["-f", "lavfi", "-i", "testsrc=size=320x240:rate=15"])
            .args(["-f", "lavfi", "-i", "sine=frequency=440:sample_rate=44100"])
            .args(["-t", "3", "-c:v", "libx264", "-c:a", "aac", "-b:a", "192k"])
            .arg(&input)
            .status()
            .unwrap();
        assert!(status.success());

        let source = SourceGeometry {
            width: 320,
            height: 240,
            fps: 15.0,
            duration_seconds: 3.0,
            size_bytes: std::fs::metadata(&input).unwrap().len(),
        };
        let backend = LibavBackend::new();
        let plan = backend.plan(1.0, &source);
        assert_eq!(plan.audio_bitrate_kbps, 64);
        backend.transcode(&input, &output, &plan, &source).await.unwrap();

        let octx = format::input(&output).unwrap();
        let stream = octx.streams().best(media::Type::Audio).unwrap();
        let audio = codec::context::Context::from_parameters(stream.parameters())
            .unwrap()
            .decoder()
            .audio()
            .unwrap();
        assert_eq!(audio.id(), codec::Id::AAC);
        assert!(audio.bit_rate() <= 80_000, "audio bitrate {}", audio.bit_rate());
    }
}
