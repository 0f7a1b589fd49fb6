#[cfg(test)]
mod tests {
    use avcs::av::{keys, BufferFlag, BufferInfo, CodecKind, Format};
    use avcs::client::{AvCodecCallback, MediaClient};
    use avcs::config::ServiceConfig;
    use avcs::format::{MediaSource, OutputFormat};
    use avcs::ipc::IpcProcess;
    use avcs::service::{ServiceContext, StubType};
    use avcs::session::ErrorType;
    use avcs::ErrorCode;
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;
    use std::time::Duration;

    #[derive(Default)]
    struct ErrorLog(Mutex<Vec<(ErrorType, i32)>>);

    impl AvCodecCallback for ErrorLog {
        fn on_error(&self, error_type: ErrorType, code: i32) {
            self.0.lock().push((error_type, code));
        }

        fn on_output_format_changed(&self, _format: &Format) {}

        fn on_input_buffer_available(&self, _index: u32) {}

        fn on_output_buffer_available(&self, _index: u32, _info: BufferInfo, _flag: BufferFlag) {}
    }

    fn mp3_format() -> Format {
        let mut format = Format::new();
        format.put_int_value(keys::CHANNEL_COUNT, 1);
        format.put_int_value(keys::SAMPLE_RATE, 48000);
        format
    }

    async fn wait_until(cond: impl Fn() -> bool) -> bool {
        for _ in 0..200 {
            if cond() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        cond()
    }

    #[tokio::test]
    async fn test_service_death_reported_once() {
        let service = ServiceContext::start(ServiceConfig::default()).unwrap();
        let app = IpcProcess::spawn("app");
        let client = MediaClient::connect(&app, service.service_object()).unwrap();
        let decoder = client
            .create_codec_by_name("mp3-decoder", CodecKind::Decoder)
            .await
            .unwrap();
        let errors = Arc::new(ErrorLog::default());
        decoder.set_callback(errors.clone()).await.unwrap();
        decoder.configure(&mp3_format()).await.unwrap();
        decoder.start().await.unwrap();
        assert!(decoder.is_service_alive());

        service.simulate_crash();
        service.simulate_crash();

        assert!(!decoder.is_service_alive());
        assert_eq!(
            errors.0.lock().clone(),
            vec![(ErrorType::ServiceDied, ErrorCode::ServiceDied.as_i32())]
        );
        assert_eq!(decoder.start().await.unwrap_err().code(), ErrorCode::ServiceDied);
        assert!(decoder.dequeue_input_buffer(0).await.unwrap_err().is_liveness());
        assert_eq!(decoder.release().await.unwrap_err().code(), ErrorCode::ServiceDied);
        assert_eq!(decoder.cache_stats().updates, 0);
        assert_eq!(errors.0.lock().len(), 1);

        let err = client
            .create_codec_by_name("mp3-decoder", CodecKind::Decoder)
            .await
            .err()
            .unwrap();
        assert_eq!(err.code(), ErrorCode::ServiceDied);
        assert!(MediaClient::connect(&app, service.service_object()).is_err());
    }

    #[tokio::test]
    async fn test_blocked_dequeue_wakes_on_service_death() {
        let service = ServiceContext::start(ServiceConfig::default()).unwrap();
        let app = IpcProcess::spawn("app");
        let client = MediaClient::connect(&app, service.service_object()).unwrap();
        let decoder = Arc::new(
            client
                .create_codec_by_name("mp3-decoder", CodecKind::Decoder)
                .await
                .unwrap(),
        );
        decoder.configure(&mp3_format()).await.unwrap();
        decoder.start().await.unwrap();

        let waiter = {
            let decoder = decoder.clone();
            tokio::spawn(async move { decoder.dequeue_output_buffer(-1).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        service.simulate_crash();
        let err = tokio::time::timeout(Duration::from_secs(5), waiter)
            .await
            .unwrap()
            .unwrap()
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::ServiceDied);
    }

    #[tokio::test]
    async fn test_client_death_reclaims_sessions() {
        let service = ServiceContext::start(ServiceConfig::default()).unwrap();
        let mut audio = Format::new();
        audio.put_string_value(keys::CODEC_MIME, "audio/mpeg");
        service
            .store()
            .insert_source("memory://song.mp3", MediaSource::new().with_track(audio, Vec::new()))
            .unwrap();

        let doomed = IpcProcess::spawn("doomed");
        let survivor = IpcProcess::spawn("survivor");
        let doomed_client = MediaClient::connect(&doomed, service.service_object()).unwrap();
        let survivor_client = MediaClient::connect(&survivor, service.service_object()).unwrap();

        let _codec = doomed_client
            .create_codec_by_name("mp3-decoder", CodecKind::Decoder)
            .await
            .unwrap();
        let _demuxer = doomed_client.create_demuxer("memory://song.mp3").await.unwrap();
        let _muxer = doomed_client
            .create_muxer("memory://partial.m4a", OutputFormat::M4a)
            .await
            .unwrap();
        let kept = survivor_client
            .create_codec_by_name("mp3-decoder", CodecKind::Decoder)
            .await
            .unwrap();
        assert_eq!(service.manager().sessions().len(), 4);

        doomed.kill();
        let manager = service.manager().clone();
        assert!(wait_until(|| manager.sessions().len() == 1).await);
        assert_eq!(manager.count(StubType::Codec), 1);
        assert_eq!(manager.count(StubType::Demuxer), 0);
        assert_eq!(manager.count(StubType::Muxer), 0);
        assert_eq!(manager.sessions()[0].pid, survivor.pid());

        kept.configure(&mp3_format()).await.unwrap();
        kept.start().await.unwrap();
        assert!(service.process().is_alive());
    }

    #[tokio::test]
    async fn test_dropped_proxies_stop_watching_service() {
        let service = ServiceContext::start(ServiceConfig::default()).unwrap();
        let app = IpcProcess::spawn("app");
        let client = MediaClient::connect(&app, service.service_object()).unwrap();
        let baseline = service.process().recipient_count();

        let mut codecs = Vec::new();
        for _ in 0..3 {
            codecs.push(
                client
                    .create_codec_by_name("mp3-decoder", CodecKind::Decoder)
                    .await
                    .unwrap(),
            );
        }
        assert_eq!(service.process().recipient_count(), baseline + 3);

        for codec in codecs.drain(1..) {
            codec.release().await.unwrap();
        }
        assert_eq!(service.process().recipient_count(), baseline + 1);

        let errors = Arc::new(ErrorLog::default());
        codecs[0].set_callback(errors.clone()).await.unwrap();
        service.simulate_crash();
        assert_eq!(errors.0.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_releases_everything() {
        let service = ServiceContext::start(ServiceConfig::default()).unwrap();
        let app = IpcProcess::spawn("app");
        let client = MediaClient::connect(&app, service.service_object()).unwrap();
        let decoder = client
            .create_codec_by_name("mp3-decoder", CodecKind::Decoder)
            .await
            .unwrap();
        decoder.configure(&mp3_format()).await.unwrap();

        service.shutdown().await;
        assert!(service.manager().sessions().is_empty());
        assert_eq!(decoder.start().await.unwrap_err().code(), ErrorCode::InvalidState);
    }
}
