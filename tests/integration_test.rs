#[cfg(test)]
mod tests {
    use avcs::av::{keys, BufferFlag, BufferInfo, CodecKind, Format, Sample};
    use avcs::client::{AvCodecCallback, MediaClient};
    use avcs::config::ServiceConfig;
    use avcs::format::{MediaSource, OutputFormat, SeekMode};
    use avcs::ipc::{CodecProxy, IpcProcess, MessageParcel};
    use avcs::memory::{MemoryFlag, SharedMemory};
    use avcs::service::{ServiceContext, StubType};
    use avcs::session::ErrorType;
    use avcs::ErrorCode;
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio_test::{assert_err, assert_ok};

    const MP3_FRAME: [u8; 4] = [0xFF, 0xFB, 0x90, 0x64];
    const WAIT_US: i64 = 1_000_000;

    #[derive(Debug, Clone, PartialEq)]
    enum Event {
        Error(ErrorType, i32),
        FormatChanged,
        Input(u32),
        Output(u32, BufferFlag),
    }

    #[derive(Default)]
    struct Recorder(Mutex<Vec<Event>>);

    impl Recorder {
        async fn wait_for(&self, pred: impl Fn(&[Event]) -> bool) -> Vec<Event> {
            for _ in 0..200 {
                {
                    let events = self.0.lock();
                    if pred(events.as_slice()) {
                        return events.clone();
                    }
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            self.0.lock().clone()
        }
    }

    impl AvCodecCallback for Recorder {
        fn on_error(&self, error_type: ErrorType, code: i32) {
            self.0.lock().push(Event::Error(error_type, code));
        }

        fn on_output_format_changed(&self, _format: &Format) {
            self.0.lock().push(Event::FormatChanged);
        }

        fn on_input_buffer_available(&self, index: u32) {
            self.0.lock().push(Event::Input(index));
        }

        fn on_output_buffer_available(&self, index: u32, _info: BufferInfo, flag: BufferFlag) {
            self.0.lock().push(Event::Output(index, flag));
        }
    }

    fn mp3_format() -> Format {
        let mut format = Format::new();
        format.put_int_value(keys::CHANNEL_COUNT, 2);
        format.put_int_value(keys::SAMPLE_RATE, 44100);
        format.put_int_value(keys::BITRATE, 128_000);
        format
    }

    fn connect(config: ServiceConfig) -> (ServiceContext, MediaClient) {
        let service = ServiceContext::start(config).unwrap();
        let app = IpcProcess::spawn("app");
        let client = MediaClient::connect(&app, service.service_object()).unwrap();
        (service, client)
    }

    async fn running_decoder(client: &MediaClient) -> CodecProxy {
        let decoder = client
            .create_codec_by_name("mp3-decoder", CodecKind::Decoder)
            .await
            .unwrap();
        decoder.configure(&mp3_format()).await.unwrap();
        decoder.start().await.unwrap();
        decoder
    }

    async fn feed(decoder: &CodecProxy, data: &[u8], pts: i64, flag: BufferFlag) -> u32 {
        let index = decoder.dequeue_input_buffer(WAIT_US).await.unwrap();
        let buffer = decoder.get_input_buffer(index).await.unwrap();
        buffer.write(0, data).unwrap();
        decoder
            .queue_input_buffer(index, BufferInfo::new(pts, data.len() as u32, 0), flag)
            .await
            .unwrap();
        index
    }

    #[tokio::test]
    async fn test_decode_run_ends_with_single_eos() {
        let (_service, client) = connect(ServiceConfig::default());
        let decoder = client
            .create_codec_by_name("mp3-decoder", CodecKind::Decoder)
            .await
            .unwrap();
        let recorder = Arc::new(Recorder::default());
        decoder.set_callback(recorder.clone()).await.unwrap();
        decoder.configure(&mp3_format()).await.unwrap();
        decoder.start().await.unwrap();

        feed(&decoder, &MP3_FRAME, 0, BufferFlag::NONE).await;
        feed(&decoder, &[], 26_000, BufferFlag::EOS).await;

        let events = recorder
            .wait_for(|events| {
                events
                    .iter()
                    .any(|e| matches!(e, Event::Output(_, flag) if flag.is_eos()))
            })
            .await;
        assert!(events.contains(&Event::FormatChanged));
        tokio::time::sleep(Duration::from_millis(50)).await;

        let events = recorder.0.lock().clone();
        let eos: Vec<usize> = events
            .iter()
            .enumerate()
            .filter(|(_, e)| matches!(e, Event::Output(_, flag) if flag.is_eos()))
            .map(|(i, _)| i)
            .collect();
        assert_eq!(eos.len(), 1);
        assert_eq!(eos[0], events.len() - 1);

        let (index, info, flag) = decoder.dequeue_output_buffer(WAIT_US).await.unwrap();
        assert_eq!(flag, BufferFlag::NONE);
        let output = decoder.get_output_buffer(index).await.unwrap();
        assert_eq!(&output.read(0, info.size as usize).unwrap()[..], &MP3_FRAME);
        assert!(output.write(0, &[0]).is_err());
        decoder.release_output_buffer(index, false).await.unwrap();

        let (_, _, flag) = decoder.dequeue_output_buffer(WAIT_US).await.unwrap();
        assert!(flag.is_eos());
        let format = decoder.output_format().await.unwrap();
        assert_eq!(format.get_int_value(keys::CHANNEL_COUNT), Some(2));
        assert_ok!(decoder.release().await);
        assert_ok!(decoder.release().await);
    }

    #[tokio::test]
    async fn test_cache_hit_sees_the_same_bytes() {
        let (_service, client) = connect(ServiceConfig::default());
        let decoder = running_decoder(&client).await;

        let index = decoder.dequeue_input_buffer(WAIT_US).await.unwrap();
        let first = decoder.get_input_buffer(index).await.unwrap();
        first.write(0, &MP3_FRAME).unwrap();
        decoder
            .queue_input_buffer(index, BufferInfo::new(0, 4, 0), BufferFlag::NONE)
            .await
            .unwrap();
        decoder.flush().await.unwrap();
        decoder.start().await.unwrap();

        assert_eq!(decoder.dequeue_input_buffer(WAIT_US).await.unwrap(), index);
        let cached = decoder.get_input_buffer(index).await.unwrap();
        let stats = decoder.cache_stats();
        assert_eq!((stats.hits, stats.updates), (1, 1));
        assert!(cached.same_region(&first));
        assert_eq!(&cached.read(0, 4).unwrap()[..], &MP3_FRAME);

        let pattern = [0xFF, 0xFB, 0xA5, 0x5A];
        cached.write(0, &pattern).unwrap();
        decoder
            .queue_input_buffer(index, BufferInfo::new(1_000, 4, 0), BufferFlag::NONE)
            .await
            .unwrap();
        let (out, info, _) = decoder.dequeue_output_buffer(WAIT_US).await.unwrap();
        let output = decoder.get_output_buffer(out).await.unwrap();
        assert_eq!(&output.read(0, info.size as usize).unwrap()[..], &pattern);

        // A second fetch of a claimed buffer is refused and drops the entry.
        let err = decoder.get_output_buffer(out).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidVal);
        assert_eq!(decoder.cache_stats().invalidations, 1);
    }

    #[tokio::test]
    async fn test_output_buffer_reuse_hits_cache() {
        let (_service, client) = connect(ServiceConfig::default());
        let decoder = running_decoder(&client).await;

        let mut first = None;
        for (round, pts) in [0i64, 26_000, 52_000].into_iter().enumerate() {
            let frame = [0xFF, 0xFB, 0x90, round as u8];
            feed(&decoder, &frame, pts, BufferFlag::NONE).await;
            let (index, info, _) = decoder.dequeue_output_buffer(WAIT_US).await.unwrap();
            assert_eq!(index, 0);

            let before = decoder.cache_stats();
            let output = decoder.get_output_buffer(index).await.unwrap();
            let after = decoder.cache_stats();
            if round == 0 {
                assert_eq!((after.hits, after.updates), (before.hits, before.updates + 1));
                first = Some(output.clone());
            } else {
                assert_eq!((after.hits, after.updates), (before.hits + 1, before.updates));
                assert!(output.same_region(first.as_ref().unwrap()));
            }
            assert_eq!(&output.read(0, info.size as usize).unwrap()[..], &frame);
            decoder.release_output_buffer(index, false).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_reconfigure_resends_handles() {
        let (_service, client) = connect(ServiceConfig::default());
        let decoder = running_decoder(&client).await;
        let index = decoder.dequeue_input_buffer(WAIT_US).await.unwrap();
        let before = decoder.get_input_buffer(index).await.unwrap();

        decoder.reset().await.unwrap();
        decoder.init(CodecKind::Decoder, false, "mp3-decoder").await.unwrap();
        decoder.configure(&mp3_format()).await.unwrap();
        decoder.start().await.unwrap();

        let index = decoder.dequeue_input_buffer(WAIT_US).await.unwrap();
        let after = decoder.get_input_buffer(index).await.unwrap();
        assert!(!after.same_region(&before));
        assert_eq!(decoder.cache_stats().hits, 0);
    }

    #[tokio::test]
    async fn test_interface_token_mismatch_is_rejected() {
        let (_service, client) = connect(ServiceConfig::default());
        let decoder = client
            .create_codec_by_name("mp3-decoder", CodecKind::Decoder)
            .await
            .unwrap();

        let mut data = MessageParcel::new();
        data.write_interface_token("avcs.ISomethingElse");
        data.write_format(&mp3_format());
        let mut reply = MessageParcel::new();
        let err = decoder
            .as_remote()
            .send_request(client.process().pid(), 3, &mut data, &mut reply)
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidOperation);

        // The session was not touched: still INITIALIZED, so configure works.
        decoder.configure(&mp3_format()).await.unwrap();
        assert_eq!(
            decoder.configure(&mp3_format()).await.unwrap_err().code(),
            ErrorCode::InvalidState
        );
    }

    #[tokio::test]
    async fn test_invalid_configure_keeps_session_usable() {
        let (_service, client) = connect(ServiceConfig::default());
        let decoder = client
            .create_codec_by_mime("audio/mpeg", CodecKind::Decoder)
            .await
            .unwrap();
        let err = decoder.configure(&Format::new()).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidVal);
        assert_eq!(err.ext_code(), avcs::ExtErrorCode::InvalidVal);
        assert_eq!(decoder.start().await.unwrap_err().code(), ErrorCode::InvalidState);
        decoder.configure(&mp3_format()).await.unwrap();
        decoder.start().await.unwrap();
    }

    #[tokio::test]
    async fn test_failed_init_destroys_stub() {
        let (service, client) = connect(ServiceConfig::default());
        let err = client
            .create_codec_by_name("no-such-codec", CodecKind::Decoder)
            .await
            .err()
            .unwrap();
        assert_eq!(err.code(), ErrorCode::Unsupport);
        assert_eq!(service.manager().count(StubType::Codec), 0);

        let err = client
            .create_codec_by_name("mp3-decoder", CodecKind::Encoder)
            .await
            .err()
            .unwrap();
        assert_eq!(err.ext_code(), avcs::ExtErrorCode::Unsupport);
        assert_eq!(service.manager().count(StubType::Codec), 0);

        let _decoder = client
            .create_codec_by_name("mp3-decoder", CodecKind::Decoder)
            .await
            .unwrap();
        assert_eq!(service.manager().count(StubType::Codec), 1);
        assert_eq!(service.manager().sessions()[0].pid, client.process().pid());
    }

    #[tokio::test]
    async fn test_session_limit() {
        let (service, client) = connect(ServiceConfig::default().with_max_sessions(2));
        let first = running_decoder(&client).await;
        let second = running_decoder(&client).await;

        let err = client
            .create_codec_by_name("mp3-decoder", CodecKind::Decoder)
            .await
            .err()
            .unwrap();
        assert_eq!(err.code(), ErrorCode::NoMemory);
        assert_eq!(service.manager().count(StubType::Codec), 2);

        feed(&first, &MP3_FRAME, 0, BufferFlag::NONE).await;
        feed(&second, &MP3_FRAME, 0, BufferFlag::NONE).await;
        assert!(first.dequeue_output_buffer(WAIT_US).await.is_ok());
        assert!(second.dequeue_output_buffer(WAIT_US).await.is_ok());

        // Other stub types have their own budget.
        let muxer = client.create_muxer("memory://limit.mp4", OutputFormat::Mp4).await;
        assert!(muxer.is_ok());
        assert_err!(client.create_muxer("memory://limit.mp4", OutputFormat::Mp4).await.map(drop));

        first.destroy_stub().await.unwrap();
        first.destroy_stub().await.unwrap();
        assert_eq!(service.manager().count(StubType::Codec), 1);
        assert!(client
            .create_codec_by_name("mp3-decoder", CodecKind::Decoder)
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_dequeue_timeout_over_ipc() {
        let (_service, client) = connect(ServiceConfig::default());
        let decoder = running_decoder(&client).await;
        let err = decoder.dequeue_output_buffer(0).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::TryAgain);
        assert!(err.is_retriable());
        let err = decoder.dequeue_output_buffer(2_000).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::TryAgain);
    }

    #[tokio::test]
    async fn test_encoder_input_surface() {
        let (_service, client) = connect(ServiceConfig::default());
        let encoder = client
            .create_codec_by_mime("video/avc", CodecKind::Encoder)
            .await
            .unwrap();
        let mut format = Format::new();
        format.put_int_value(keys::WIDTH, 16);
        format.put_int_value(keys::HEIGHT, 16);
        encoder.configure(&format).await.unwrap();
        let surface = encoder.create_input_surface().await.unwrap();
        encoder.start().await.unwrap();
        assert_eq!(
            encoder.dequeue_input_buffer(0).await.unwrap_err().code(),
            ErrorCode::InvalidOperation
        );

        surface.queue_frame(vec![0x10; 384], 0);
        let (index, _, flag) = encoder.dequeue_output_buffer(WAIT_US).await.unwrap();
        assert!(flag.contains(BufferFlag::CODEC_DATA));
        encoder.release_output_buffer(index, false).await.unwrap();
        let (index, info, flag) = encoder.dequeue_output_buffer(WAIT_US).await.unwrap();
        assert!(flag.contains(BufferFlag::SYNC_FRAME));
        let output = encoder.get_output_buffer(index).await.unwrap();
        assert_eq!(&output.read(0, 5).unwrap()[..], &[0, 0, 0, 1, 0x65]);
        assert_eq!(info.size, 384 + 5);

        encoder.notify_eos().await.unwrap();
        encoder.release_output_buffer(index, false).await.unwrap();
        let (_, _, flag) = encoder.dequeue_output_buffer(WAIT_US).await.unwrap();
        assert!(flag.is_eos());
    }

    fn audio_source() -> MediaSource {
        let mut audio = Format::new();
        audio.put_string_value(keys::CODEC_MIME, "audio/mp4a-latm");
        audio.put_int_value(keys::CHANNEL_COUNT, 2);
        audio.put_int_value(keys::SAMPLE_RATE, 44100);
        let samples = (0..5)
            .map(|i| Sample::new(vec![i as u8; 8]).with_pts(i * 23_000).with_key_flag(true))
            .collect();
        MediaSource::new().with_title("clip").with_track(audio, samples)
    }

    #[tokio::test]
    async fn test_demux_then_mux() {
        let (service, client) = connect(ServiceConfig::default());
        service.store().insert_source("memory://in.m4a", audio_source()).unwrap();

        let demuxer = client.create_demuxer("memory://in.m4a").await.unwrap();
        let source = demuxer.source_format().await.unwrap();
        assert_eq!(source.get_int_value(keys::TRACK_COUNT), Some(1));
        let track = demuxer.track_format(0).await.unwrap();
        demuxer.select_track(0).await.unwrap();
        demuxer.seek_to_time(40, SeekMode::PreviousSync).await.unwrap();

        let muxer = client.create_muxer("memory://out.m4a", OutputFormat::M4a).await.unwrap();
        let out_track = muxer.add_track(&track).await.unwrap();
        muxer.start().await.unwrap();

        let memory = SharedMemory::create(64, MemoryFlag::ReadWrite, "transfer").unwrap();
        loop {
            let (info, flag) = demuxer.read_sample(0, &memory).await.unwrap();
            if flag.is_eos() {
                assert_eq!(info.size, 0);
                break;
            }
            muxer.write_sample(out_track, &memory, info, flag).await.unwrap();
        }
        muxer.stop().await.unwrap();
        demuxer.release().await.unwrap();

        let file = service.store().muxed("memory://out.m4a").unwrap();
        assert!(file.finalized);
        let pts: Vec<i64> = file.samples.iter().map(|s| s.pts_us).collect();
        assert_eq!(pts, vec![23_000, 46_000, 69_000, 92_000]);

        let reread = client.create_demuxer("memory://out.m4a").await.unwrap();
        reread.select_track(0).await.unwrap();
        let (info, _) = reread.read_sample(0, &memory).await.unwrap();
        assert_eq!(info.presentation_time_us, 23_000);
        assert_eq!(memory.read(0, 8).unwrap()[0], 1);
    }

    #[tokio::test]
    async fn test_failed_open_destroys_format_stubs() {
        let (service, client) = connect(ServiceConfig::default());
        let err = client.create_demuxer("memory://absent.mp4").await.err().unwrap();
        assert_eq!(err.code(), ErrorCode::DemuxerFailed);
        let err = client.create_demuxer("file:///tmp/a.mp4").await.err().unwrap();
        assert_eq!(err.code(), ErrorCode::UnsupportFileType);
        assert_eq!(service.manager().count(StubType::Demuxer), 0);

        let err = client
            .create_muxer("file:///tmp/out.mp4", OutputFormat::Mp4)
            .await
            .err()
            .unwrap();
        assert_eq!(err.code(), ErrorCode::UnsupportFileType);
        assert_eq!(service.manager().count(StubType::Muxer), 0);
        assert!(service.manager().sessions().is_empty());
    }
}
