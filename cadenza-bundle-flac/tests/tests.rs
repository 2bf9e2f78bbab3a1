// Cadenza
// Copyright (c) 2019-2024 The Project Cadenza Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::io::Cursor;

use cadenza_bundle_flac::{
    DecodeHandler, DecoderOptions, DecoderState, EncoderOptions, EncoderState, ErrorStatus,
    FinishResult, Frame, StreamDecoder, StreamEncoder, SubFrameInfo, SubFrameKind, WriteStatus,
};
use cadenza_core::errors::{Error, SeekErrorKind};
use cadenza_core::io::{ByteSource, ReadOnlySource, SeekableSink, SeekableSource, WriteOnlySink};
use cadenza_utils_xiph::flac::{
    Application, MetadataBlock, MetadataBlockData, MetadataBlockType, SeekTable, VorbisComment,
};

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

/// Collects everything a decoder delivers.
#[derive(Default)]
struct Collector {
    channels: Vec<Vec<i32>>,
    frames: Vec<(u64, u32)>,
    /// The subframe descriptions and footer checksum of each frame.
    subframes: Vec<Vec<SubFrameInfo>>,
    crcs: Vec<u16>,
    metadata: Vec<MetadataBlock>,
    errors: Vec<ErrorStatus>,
    /// Abort after this many frames.
    abort_after: Option<usize>,
}

impl DecodeHandler for Collector {
    fn write(&mut self, frame: &Frame, channels: &[&[i32]]) -> WriteStatus {
        self.channels.resize_with(channels.len(), Vec::new);

        for (out, samples) in self.channels.iter_mut().zip(channels) {
            assert_eq!(samples.len(), frame.n_samples as usize);
            out.extend_from_slice(samples);
        }

        self.frames.push((frame.first_sample, frame.n_samples));
        self.subframes.push(frame.subframes.to_vec());
        self.crcs.push(frame.crc16);

        if Some(self.frames.len()) == self.abort_after {
            WriteStatus::Abort
        }
        else {
            WriteStatus::Continue
        }
    }

    fn metadata(&mut self, block: &MetadataBlock) {
        self.metadata.push(block.clone());
    }

    fn error(&mut self, status: ErrorStatus) {
        self.errors.push(status);
    }
}

/// Generates a correlated multi-channel test signal: a sine per channel plus noise.
fn signal(n_samples: usize, n_channels: usize, bps: u32, seed: u64) -> Vec<Vec<i32>> {
    let mut rng = SmallRng::seed_from_u64(seed);

    let max = (1i64 << (bps - 1)) - 1;
    let min = -(1i64 << (bps - 1));
    let noise = (max / 20).max(1);

    (0..n_channels)
        .map(|ch| {
            let freq = 220.0 * (ch + 1) as f64;

            (0..n_samples)
                .map(|i| {
                    let t = i as f64 / 44100.0;
                    let tone = (std::f64::consts::TAU * freq * t).sin() * 0.6 * max as f64;
                    let sample = tone as i64 + rng.random_range(-noise..=noise);
                    sample.clamp(min, max) as i32
                })
                .collect()
        })
        .collect()
}

fn noise(n_samples: usize, bps: u32, seed: u64) -> Vec<i32> {
    let mut rng = SmallRng::seed_from_u64(seed);

    let max = (1i32 << (bps - 1)) - 1;

    (0..n_samples).map(|_| rng.random_range(-max - 1..=max)).collect()
}

/// Encodes `channels`, feeding the encoder with blocks of varying lengths.
fn encode(mut options: EncoderOptions, metadata: Vec<MetadataBlock>, channels: &[Vec<i32>]) -> Vec<u8> {
    options.channels = channels.len() as u32;

    let mut encoder = StreamEncoder::new(options);
    assert!(encoder.set_metadata(metadata));

    encoder.init_stream(SeekableSink::new(Cursor::new(Vec::new()))).unwrap();

    let n_samples = channels[0].len();

    let mut start = 0;
    let mut step = 1000;

    while start < n_samples {
        let end = n_samples.min(start + step);
        let block: Vec<&[i32]> = channels.iter().map(|ch| &ch[start..end]).collect();

        encoder.process(&block).unwrap();

        start = end;
        step = (step * 3) % 5000 + 1;
    }

    assert_eq!(encoder.state(), EncoderState::Ok);
    assert!(encoder.verify_mismatch().is_none());

    encoder.finish().unwrap();
    assert_eq!(encoder.state(), EncoderState::Uninitialized);

    encoder.into_sink().unwrap().into_inner().into_inner()
}

fn decode_with(
    decoder: &mut StreamDecoder,
    source: Box<dyn ByteSource>,
) -> (Collector, Result<(), Error>) {
    decoder.init_stream(source).unwrap();

    let mut collector = Collector::default();
    let result = decoder.process_until_end_of_stream(&mut collector);

    (collector, result)
}

fn decode(bytes: Vec<u8>) -> (Collector, FinishResult) {
    let mut decoder = StreamDecoder::new(DecoderOptions { md5_checking: true, ..Default::default() });

    let (collector, result) =
        decode_with(&mut decoder, Box::new(SeekableSource::new(Cursor::new(bytes))));

    result.unwrap();
    assert_eq!(decoder.state(), DecoderState::EndOfStream);
    assert!(collector.errors.is_empty(), "errors: {:?}", collector.errors);

    (collector, decoder.finish())
}

/// Gets the byte offset of the first frame by walking the metadata block headers.
fn first_frame_offset(bytes: &[u8]) -> usize {
    let mut pos = 4;

    loop {
        let is_last = bytes[pos] & 0x80 != 0;
        let len = u32::from_be_bytes([0, bytes[pos + 1], bytes[pos + 2], bytes[pos + 3]]) as usize;

        pos += 4 + len;

        if is_last {
            return pos;
        }
    }
}

/// Checks every delivered frame against the original audio.
fn check_delivered(collector: &Collector, original: &[Vec<i32>]) {
    let mut offset = 0;

    for &(first, n) in collector.frames.iter() {
        let (first, n) = (first as usize, n as usize);

        for (decoded, original) in collector.channels.iter().zip(original) {
            assert_eq!(&decoded[offset..offset + n], &original[first..first + n]);
        }

        offset += n;
    }
}

#[test]
fn verify_round_trip() {
    // (channels, bits per sample, sample rate, compression level, streamable subset)
    let cases = [
        (1, 8, 44100, 5, true),
        (2, 16, 44100, 5, true),
        (2, 16, 48000, 8, true),
        (3, 24, 96000, 6, true),
        (2, 32, 44100, 8, true),
        (8, 12, 22050, 2, true),
        (1, 4, 8000, 3, false),
        (2, 20, 44100, 1, true),
    ];

    for (i, &(n_channels, bps, sample_rate, level, subset)) in cases.iter().enumerate() {
        // Not a multiple of any block size, so the final block is short.
        let original = signal(10_017, n_channels, bps, i as u64);

        let mut options = EncoderOptions::new(n_channels as u32, bps, sample_rate)
            .with_compression_level(level);
        options.verify = true;
        options.streamable_subset = subset;

        let bytes = encode(options, Vec::new(), &original);

        let (collector, finish) = decode(bytes);

        assert_eq!(finish.md5_ok, Some(true), "case {}", i);
        assert_eq!(collector.channels, original, "case {}", i);

        match &collector.metadata[0].data {
            MetadataBlockData::StreamInfo(info) => {
                assert_eq!(info.n_samples, Some(10_017));
                assert_eq!(info.n_channels, n_channels as u32);
                assert_eq!(info.bits_per_sample, bps);
                assert_eq!(info.sample_rate, sample_rate);
                assert!(info.frame_byte_len_min > 0);
                assert!(info.frame_byte_len_min <= info.frame_byte_len_max);
            }
            _ => panic!("expected stream information first"),
        }
    }
}

#[test]
fn verify_every_compression_level() {
    let original = signal(9000, 2, 16, 99);

    for level in 0..=8 {
        let options = EncoderOptions::new(2, 16, 44100).with_compression_level(level);

        let (collector, finish) = decode(encode(options, Vec::new(), &original));

        assert_eq!(finish.md5_ok, Some(true), "level {}", level);
        assert_eq!(collector.channels, original, "level {}", level);
    }
}

#[test]
fn verify_exhaustive_search_options() {
    let original = signal(6000, 2, 16, 3);

    let mut options = EncoderOptions::new(2, 16, 44100);
    options.do_exhaustive_model_search = true;
    options.do_qlp_coeff_prec_search = true;
    options.do_escape_coding = true;
    options.rice_parameter_search_dist = 2;
    options.min_residual_partition_order = 2;
    options.apodization = "hann;gauss(0.2);punchout_tukey(2)".to_string();

    let (collector, _) = decode(encode(options, Vec::new(), &original));
    assert_eq!(collector.channels, original);
}

#[test]
fn verify_interleaved_input() {
    let original = signal(5000, 2, 16, 11);

    let interleaved: Vec<i32> =
        (0..5000).flat_map(|i| [original[0][i], original[1][i]]).collect();

    let mut encoder = StreamEncoder::new(EncoderOptions::new(2, 16, 44100));
    encoder.init_stream(SeekableSink::new(Cursor::new(Vec::new()))).unwrap();

    for chunk in interleaved.chunks(2 * 777) {
        encoder.process_interleaved(chunk).unwrap();
    }

    encoder.finish().unwrap();

    let bytes = encoder.into_sink().unwrap().into_inner().into_inner();

    let (collector, finish) = decode(bytes);
    assert_eq!(finish.md5_ok, Some(true));
    assert_eq!(collector.channels, original);
}

#[test]
fn verify_silence() {
    let original = vec![vec![0i32; 44100]; 2];

    let options = EncoderOptions::new(2, 16, 44100);
    let bytes = encode(options, Vec::new(), &original);

    let n_frames = (44100 + 4095) / 4096;
    assert!(bytes.len() - first_frame_offset(&bytes) <= n_frames * 20);

    let (collector, finish) = decode(bytes);

    assert_eq!(finish.md5_ok, Some(true));
    assert_eq!(collector.channels, original);

    // Every channel of every block codes as a single constant.
    assert_eq!(collector.subframes.len(), n_frames);

    for subframes in collector.subframes.iter() {
        assert_eq!(subframes.len(), 2);

        for info in subframes {
            assert_eq!(info.kind, SubFrameKind::Constant);
            assert_eq!(info.order, 0);
            assert_eq!(info.wasted_bits, 0);
        }
    }

    match &collector.metadata[0].data {
        MetadataBlockData::StreamInfo(info) => assert_eq!(info.n_samples, Some(44100)),
        _ => panic!("expected stream information first"),
    }
}

#[test]
fn verify_truncated_stream() {
    let original = signal(10_000, 2, 16, 5);

    let mut bytes = encode(EncoderOptions::new(2, 16, 44100), Vec::new(), &original);

    // Cut the final frame short.
    bytes.truncate(bytes.len() - 3);

    let mut decoder = StreamDecoder::default();

    let (collector, result) =
        decode_with(&mut decoder, Box::new(ReadOnlySource::new(Cursor::new(bytes))));

    match result {
        Err(Error::IoError(err)) => assert_eq!(err.kind(), std::io::ErrorKind::UnexpectedEof),
        other => panic!("expected an unexpected end of stream, got {:?}", other),
    }

    assert_eq!(decoder.state(), DecoderState::EndOfStream);

    // Only whole frames were delivered.
    assert_eq!(collector.frames.len(), 10_000 / 4096);
    assert_eq!(collector.channels[0].len(), 2 * 4096);
    check_delivered(&collector, &original);
}

#[test]
fn verify_corrupt_frame_payload() {
    // Full-scale noise codes as verbatim subframes.
    let original = vec![noise(20 * 1152, 16, 7)];

    let mut options = EncoderOptions::new(1, 16, 44100).with_compression_level(0);
    options.max_lpc_order = 0;

    let mut bytes = encode(options, Vec::new(), &original);

    // Flip a bit in the samples of the first frame.
    let offset = first_frame_offset(&bytes);
    bytes[offset + 100] ^= 0x10;

    let mut decoder = StreamDecoder::default();

    let (collector, result) =
        decode_with(&mut decoder, Box::new(SeekableSource::new(Cursor::new(bytes))));

    result.unwrap();

    assert_eq!(collector.errors, vec![ErrorStatus::FrameCrcMismatch]);
    assert_eq!(collector.frames.len(), 19);
    assert_eq!(collector.frames[0].0, 1152);
    check_delivered(&collector, &original);
}

#[test]
fn verify_corrupt_frame_header() {
    let original = vec![noise(20 * 1152, 16, 8)];

    let options = EncoderOptions::new(1, 16, 44100).with_compression_level(0);

    let mut bytes = encode(options, Vec::new(), &original);

    // The frame number of the first frame is 0, make it 2.
    let offset = first_frame_offset(&bytes);
    assert_eq!(bytes[offset + 4], 0x00);
    bytes[offset + 4] ^= 0x02;

    let mut decoder = StreamDecoder::default();

    let (collector, result) =
        decode_with(&mut decoder, Box::new(SeekableSource::new(Cursor::new(bytes))));

    result.unwrap();

    assert_eq!(collector.errors.first(), Some(&ErrorStatus::BadHeader));
    assert!(collector.frames.iter().all(|&(first, _)| first != 0));
    check_delivered(&collector, &original);
}

#[test]
fn verify_vorbis_comments() {
    for n_comments in [0, 1, 100] {
        let mut comment = VorbisComment::new("test vendor");

        for i in 0..n_comments {
            comment.push_entry("TITLE", &format!("Track {}", i));
        }

        // Entries that are not UTF-8 pass through unchanged.
        comment.comments.push(b"DESCRIPTION=\xe9t\xe9".to_vec());

        let metadata = vec![MetadataBlock::new(MetadataBlockData::VorbisComment(comment.clone()))];

        let bytes = encode(EncoderOptions::new(1, 16, 44100), metadata, &signal(100, 1, 16, 1));

        let mut decoder = StreamDecoder::default();
        assert!(decoder.set_metadata_respond(MetadataBlockType::VorbisComment));

        let (collector, result) =
            decode_with(&mut decoder, Box::new(SeekableSource::new(Cursor::new(bytes))));
        result.unwrap();

        assert_eq!(collector.metadata.len(), 2);
        assert_eq!(collector.metadata[1].data, MetadataBlockData::VorbisComment(comment));
        assert!(collector.metadata[1].is_last);
    }
}

#[test]
fn verify_default_vorbis_comment() {
    let bytes = encode(EncoderOptions::new(1, 16, 44100), Vec::new(), &signal(100, 1, 16, 1));

    let mut decoder = StreamDecoder::default();
    assert!(decoder.set_metadata_respond_all());

    let (collector, result) =
        decode_with(&mut decoder, Box::new(SeekableSource::new(Cursor::new(bytes))));
    result.unwrap();

    match &collector.metadata[1].data {
        MetadataBlockData::VorbisComment(comment) => {
            assert_eq!(comment.vendor_lossy(), cadenza_bundle_flac::VENDOR_STRING);
            assert!(comment.comments.is_empty());
        }
        _ => panic!("expected a vorbis comment block"),
    }
}

#[test]
fn verify_application_filter() {
    let app = |id: &[u8; 4]| {
        MetadataBlock::new(MetadataBlockData::Application(Application {
            id: *id,
            data: Box::new([1, 2, 3]),
        }))
    };

    let metadata = vec![app(b"abcd"), app(b"wxyz"), MetadataBlock::new(MetadataBlockData::Padding(16))];

    let bytes = encode(EncoderOptions::new(1, 16, 44100), metadata, &signal(100, 1, 16, 1));

    let delivered = |decoder: &mut StreamDecoder| {
        let (collector, result) =
            decode_with(decoder, Box::new(SeekableSource::new(Cursor::new(bytes.clone()))));
        result.unwrap();

        collector
            .metadata
            .iter()
            .map(|block| match &block.data {
                MetadataBlockData::Application(app) => app.id.to_vec(),
                data => data.block_type().name().as_bytes().to_vec(),
            })
            .collect::<Vec<_>>()
    };

    // Only the stream information block by default.
    let mut decoder = StreamDecoder::default();
    assert_eq!(delivered(&mut decoder).len(), 1);

    // One application by identifier.
    let mut decoder = StreamDecoder::default();
    assert!(decoder.set_metadata_respond_application(*b"wxyz"));
    assert_eq!(delivered(&mut decoder)[1..], [b"wxyz".to_vec()]);

    // Every block except one application.
    let mut decoder = StreamDecoder::default();
    assert!(decoder.set_metadata_respond_all());
    assert!(decoder.set_metadata_ignore_application(*b"abcd"));
    assert!(decoder.set_metadata_ignore(MetadataBlockType::VorbisComment));

    let blocks = delivered(&mut decoder);
    assert_eq!(blocks.len(), 3);
    assert_eq!(blocks[1], b"wxyz".to_vec());
}

#[test]
fn verify_seek() {
    const N_SAMPLES: usize = 100_000;

    let original = signal(N_SAMPLES, 2, 16, 21);

    let with_table = vec![MetadataBlock::new(MetadataBlockData::SeekTable(
        SeekTable::default().with_spaced_points(10, N_SAMPLES as u64).with_placeholders(2),
    ))];

    for metadata in [Vec::new(), with_table] {
        let has_table = !metadata.is_empty();

        let bytes = encode(EncoderOptions::new(2, 16, 44100), metadata, &original);

        let mut decoder = StreamDecoder::new(DecoderOptions { md5_checking: true, ..Default::default() });
        assert!(decoder.set_metadata_respond(MetadataBlockType::SeekTable));

        decoder.init_stream(Box::new(SeekableSource::new(Cursor::new(bytes)))).unwrap();

        let mut collector = Collector::default();

        decoder.process_until_end_of_metadata(&mut collector).unwrap();
        assert_eq!(decoder.total_samples(), Some(N_SAMPLES as u64));

        if has_table {
            match &collector.metadata[1].data {
                MetadataBlockData::SeekTable(table) => {
                    assert!(table.is_legal());

                    let points: Vec<_> =
                        table.points.iter().filter(|point| !point.is_placeholder()).collect();

                    assert_eq!(points.len(), 10);
                    assert_eq!(points[0].stream_offset, 0);

                    for point in points {
                        assert_eq!(point.sample_number % 4096, 0);
                        assert_eq!(point.frame_samples, 4096);
                    }
                }
                _ => panic!("expected a seek table"),
            }
        }

        assert!(matches!(
            decoder.seek_absolute(&mut collector, N_SAMPLES as u64),
            Err(Error::SeekError(SeekErrorKind::OutOfRange))
        ));
        assert_eq!(decoder.state(), DecoderState::SearchForFrameSync);

        for target in [54_321u64, 7, 99_999, 12_288] {
            let mut collector = Collector::default();

            decoder.seek_absolute(&mut collector, target).unwrap();

            assert_eq!(collector.frames.len(), 1);
            assert_eq!(collector.frames[0].0, target);
            check_delivered(&collector, &original);
        }

        // Seeking disables MD5 checking. Decode the remainder of the stream.
        assert!(!decoder.md5_checking());

        let mut collector = Collector::default();
        decoder.seek_absolute(&mut collector, 1000).unwrap();
        decoder.process_until_end_of_stream(&mut collector).unwrap();

        assert_eq!(collector.channels[0].len(), N_SAMPLES - 1000);
        check_delivered(&collector, &original);

        assert_eq!(decoder.finish().md5_ok, None);
    }
}

#[test]
fn verify_unseekable_source() {
    let bytes = encode(EncoderOptions::new(1, 16, 44100), Vec::new(), &signal(5000, 1, 16, 2));

    let mut decoder = StreamDecoder::default();
    decoder.init_stream(Box::new(ReadOnlySource::new(Cursor::new(bytes)))).unwrap();

    let mut collector = Collector::default();

    assert!(matches!(
        decoder.seek_absolute(&mut collector, 100),
        Err(Error::SeekError(SeekErrorKind::Unseekable))
    ));
    assert_eq!(decoder.state(), DecoderState::SearchForMetadata);
    assert_eq!(decoder.decode_position(), None);

    // Forward decoding is unaffected.
    decoder.process_until_end_of_stream(&mut collector).unwrap();
    assert_eq!(collector.channels[0].len(), 5000);
}

#[test]
fn verify_step_by_step() {
    let original = signal(10_000, 2, 16, 4);
    let bytes = encode(EncoderOptions::new(2, 16, 44100), Vec::new(), &original);

    let mut decoder = StreamDecoder::default();
    decoder.init_stream(Box::new(SeekableSource::new(Cursor::new(bytes.clone())))).unwrap();

    let mut collector = Collector::default();

    // The stream information block, then the vorbis comment.
    decoder.process_single(&mut collector).unwrap();
    assert_eq!(collector.metadata.len(), 1);
    assert_eq!(decoder.state(), DecoderState::ReadMetadata);
    assert_eq!(decoder.sample_rate(), 44100);

    decoder.process_until_end_of_metadata(&mut collector).unwrap();
    assert_eq!(decoder.state(), DecoderState::SearchForFrameSync);

    decoder.process_single(&mut collector).unwrap();
    assert_eq!(collector.frames, vec![(0, 4096)]);
    assert_eq!(decoder.blocksize(), 4096);
    assert_eq!(decoder.channels(), 2);
    assert_eq!(decoder.bits_per_sample(), 16);
    assert!(decoder.channel_assignment().is_some());

    // The frame footer is the last two bytes of the frame.
    let end = decoder.decode_position().unwrap() as usize;
    assert_eq!(collector.crcs, vec![u16::from_be_bytes([bytes[end - 2], bytes[end - 1]])]);

    assert_eq!(collector.subframes[0].len(), 2);
    assert!(collector.subframes[0].iter().all(|info| info.kind != SubFrameKind::Constant));

    decoder.skip_single_frame(&mut collector).unwrap();
    assert_eq!(collector.frames.len(), 1);
    assert!(!decoder.md5_checking());

    decoder.process_single(&mut collector).unwrap();
    assert_eq!(collector.frames[1], (8192, 10_000 - 8192));

    decoder.process_single(&mut collector).unwrap();
    assert_eq!(decoder.state(), DecoderState::EndOfStream);
    assert_eq!(decoder.resolved_state_string(), "END_OF_STREAM");

    check_delivered(&collector, &original);
}

#[test]
fn verify_abort_and_reset() {
    let original = signal(10_000, 1, 16, 6);
    let bytes = encode(EncoderOptions::new(1, 16, 44100), Vec::new(), &original);

    let mut decoder = StreamDecoder::default();
    decoder.init_stream(Box::new(SeekableSource::new(Cursor::new(bytes)))).unwrap();

    let mut collector = Collector { abort_after: Some(1), ..Default::default() };

    assert!(matches!(decoder.process_until_end_of_stream(&mut collector), Err(Error::Aborted)));
    assert_eq!(decoder.state(), DecoderState::Aborted);

    assert!(matches!(
        decoder.process_single(&mut collector),
        Err(Error::ResetRequired)
    ));

    decoder.reset().unwrap();
    assert_eq!(decoder.state(), DecoderState::SearchForMetadata);

    let mut collector = Collector::default();
    decoder.process_until_end_of_stream(&mut collector).unwrap();
    assert_eq!(collector.channels, original);
}

#[test]
fn verify_stream_without_metadata() {
    let original = signal(10_000, 2, 16, 9);
    let bytes = encode(EncoderOptions::new(2, 16, 44100), Vec::new(), &original);

    let frames = bytes[first_frame_offset(&bytes)..].to_vec();

    let mut decoder = StreamDecoder::default();

    let (collector, result) =
        decode_with(&mut decoder, Box::new(ReadOnlySource::new(Cursor::new(frames))));
    result.unwrap();

    assert!(collector.metadata.is_empty());
    assert!(collector.errors.is_empty());
    assert_eq!(decoder.total_samples(), None);
    assert_eq!(collector.channels, original);
}

#[test]
fn verify_leading_id3v2_tag() {
    let original = signal(3000, 1, 16, 10);

    let mut bytes = b"ID3\x04\x00\x00\x00\x00\x00\x0a".to_vec();
    bytes.extend_from_slice(&[0; 10]);
    bytes.extend(encode(EncoderOptions::new(1, 16, 44100), Vec::new(), &original));

    let (collector, finish) = decode(bytes);

    assert_eq!(finish.md5_ok, Some(true));
    assert_eq!(collector.channels, original);
}

#[test]
fn verify_unseekable_sink() {
    let original = signal(5000, 1, 16, 12);

    let mut encoder = StreamEncoder::new(EncoderOptions::new(1, 16, 44100));
    encoder.init_stream(WriteOnlySink::new(Vec::new())).unwrap();
    encoder.process(&[original[0].as_slice()]).unwrap();
    encoder.finish().unwrap();

    let bytes = encoder.into_sink().unwrap().into_inner();

    // The stream information block could not be completed.
    let (collector, finish) = decode(bytes);

    assert_eq!(finish.md5_ok, None);
    assert_eq!(collector.channels, original);

    match &collector.metadata[0].data {
        MetadataBlockData::StreamInfo(info) => {
            assert_eq!(info.n_samples, None);
            assert_eq!(info.md5, None);
        }
        _ => panic!("expected stream information first"),
    }
}
