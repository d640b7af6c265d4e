//! End-to-end generation: ingest real files through the source handlers,
//! run the standard pipeline, and inspect the published artifacts.

use std::io::Write;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use path_sandbox::PathSandbox;
use tvmux::config::{AppConfig, FetcherConfig, StateManagerConfig};
use tvmux::ingestor::IngestionStateManager;
use tvmux::models::{EpgSource, EpgSourceType, StreamProxy, StreamSource, StreamSourceType};
use tvmux::pipeline::{LogProgressReporter, Pipeline, PipelineState, StageDependencies};
use tvmux::repositories::InMemoryRepository;
use tvmux::sources::{IngestionService, SourceHandlerFactory};
use tvmux::utils::circuit_breaker::CircuitBreakerRegistry;
use tvmux::utils::fetch::ResourceFetcher;

const PRIMARY_PLAYLIST: &str = r#"#EXTM3U
#EXTINF:-1 tvg-id="ch1" tvg-name="A" group-title="News",News A HD
http://x/a.m3u8
#EXTINF:-1 tvg-id="ch2" tvg-chno="42",Sports B
http://x/b.m3u8
"#;

const BACKUP_PLAYLIST: &str = r#"#EXTM3U
#EXTINF:-1 tvg-id="ch1" tvg-name="A2",News A from backup
http://y/a.m3u8
#EXTINF:-1 tvg-id="ch3",Movies C
http://y/c.m3u8
"#;

/// Guide content with programmes inside the pipeline's 7-day horizon. The
/// wall-clock timestamps carry a +0100 offset, so the normalized UTC
/// instants land one hour earlier.
fn guide_within_horizon() -> String {
    let start = chrono::Utc::now() + chrono::Duration::hours(4);
    let stop = start + chrono::Duration::hours(1);
    let fmt = |t: chrono::DateTime<chrono::Utc>| format!("{} +0100", t.format("%Y%m%d%H%M%S"));
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<tv>
  <channel id="ch1">
    <display-name>News A</display-name>
  </channel>
  <programme channel="ch1" start="{start}" stop="{stop}">
    <title>Morning News</title>
  </programme>
  <programme channel="unknown" start="{start}" stop="{stop}">
    <title>Orphan</title>
  </programme>
</tv>"#,
        start = fmt(start),
        stop = fmt(stop),
    )
}

struct Fixture {
    repo: InMemoryRepository,
    service: IngestionService,
    proxy: StreamProxy,
    output_dir: tempfile::TempDir,
    _files: Vec<tempfile::NamedTempFile>,
}

fn write_temp(content: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file
}

fn file_url(file: &tempfile::NamedTempFile) -> String {
    format!("file://{}", file.path().display())
}

async fn fixture() -> Fixture {
    let repo = InMemoryRepository::new();
    let fetcher = ResourceFetcher::new(FetcherConfig::default(), CircuitBreakerRegistry::default());
    let factory = Arc::new(SourceHandlerFactory::new(
        fetcher,
        Some(Arc::new(repo.clone())),
    ));
    let service = IngestionService::new(
        factory,
        IngestionStateManager::new(StateManagerConfig::default()),
        Arc::new(repo.clone()),
        Arc::new(repo.clone()),
    );

    let mut proxy = StreamProxy::new("living-room");
    proxy.starting_channel_number = 10;

    Fixture {
        repo,
        service,
        proxy,
        output_dir: tempfile::tempdir().unwrap(),
        _files: Vec::new(),
    }
}

async fn deps_for(fixture: &Fixture) -> StageDependencies {
    StageDependencies {
        config: AppConfig::default(),
        proxy_config: Arc::new(fixture.repo.clone()),
        channels: Arc::new(fixture.repo.clone()),
        programs: Arc::new(fixture.repo.clone()),
        evaluator: None,
        ingestion_state: Some(Arc::new(fixture.service.state_manager().clone())),
        output_sandbox: PathSandbox::builder()
            .base_directory(fixture.output_dir.path())
            .build()
            .await
            .unwrap(),
        progress: Arc::new(LogProgressReporter),
    }
}

async fn run_pipeline(fixture: &Fixture) -> tvmux::pipeline::PipelineExecution {
    let deps = deps_for(fixture).await;
    let temp = tempfile::tempdir().unwrap();
    // The orchestrator owns and removes this directory.
    let temp_path = temp.keep();
    let state = PipelineState::new(fixture.proxy.clone(), temp_path, "");
    Pipeline::standard(&deps)
        .execute(&CancellationToken::new(), state)
        .await
}

#[tokio::test]
async fn m3u_round_trip_renumbers_and_keys_on_tvg_id() {
    let mut fixture = fixture().await;
    let playlist = write_temp(PRIMARY_PLAYLIST);

    let source = StreamSource::new("primary", StreamSourceType::M3u, file_url(&playlist));
    fixture.repo.insert_source(source.clone()).await;
    fixture.repo.assign_source(fixture.proxy.id, source.id, 1).await;
    fixture._files.push(playlist);

    let token = CancellationToken::new();
    let stored = fixture
        .service
        .ingest_stream_source(&token, &source)
        .await
        .unwrap();
    assert_eq!(stored, 2);

    use tvmux::repositories::ChannelRepository as _;
    let channels = fixture.repo.channels_for_source(source.id).await.unwrap();
    assert_eq!(channels[0].ext_id, "ch1");
    assert_eq!(channels[1].ext_id, "ch2");

    let report = run_pipeline(&fixture).await;
    assert!(report.success, "pipeline failed: {:?}", report.error_message);

    let output = fixture
        .output_dir
        .path()
        .join(format!("{}.m3u", fixture.proxy.id));
    let content = std::fs::read_to_string(output).unwrap();
    let lines: Vec<&str> = content.lines().collect();
    assert_eq!(lines[0], "#EXTM3U");
    assert!(lines[1].contains("tvg-chno=\"10\"") && lines[1].ends_with(",News A HD"));
    assert_eq!(lines[2], "http://x/a.m3u8");
    assert!(lines[3].contains("tvg-chno=\"11\"") && lines[3].ends_with(",Sports B"));
    assert_eq!(lines[4], "http://x/b.m3u8");
}

#[tokio::test]
async fn duplicates_across_sources_resolve_by_priority() {
    let mut fixture = fixture().await;
    let primary = write_temp(PRIMARY_PLAYLIST);
    let backup = write_temp(BACKUP_PLAYLIST);

    let source_a = StreamSource::new("a", StreamSourceType::M3u, file_url(&primary));
    let source_b = StreamSource::new("b", StreamSourceType::M3u, file_url(&backup));
    fixture.repo.insert_source(source_a.clone()).await;
    fixture.repo.insert_source(source_b.clone()).await;
    fixture.repo.assign_source(fixture.proxy.id, source_a.id, 1).await;
    fixture.repo.assign_source(fixture.proxy.id, source_b.id, 2).await;
    fixture._files.push(primary);
    fixture._files.push(backup);

    let token = CancellationToken::new();
    fixture
        .service
        .ingest_stream_source(&token, &source_a)
        .await
        .unwrap();
    fixture
        .service
        .ingest_stream_source(&token, &source_b)
        .await
        .unwrap();

    let report = run_pipeline(&fixture).await;
    assert!(report.success);
    // ch1 from the backup source lost the merge; that is reported, not fatal.
    assert!(report
        .non_fatal_errors
        .iter()
        .any(|e| e.stage == "channel_load" && e.message.contains("'b'")));

    let output = fixture
        .output_dir
        .path()
        .join(format!("{}.m3u", fixture.proxy.id));
    let content = std::fs::read_to_string(output).unwrap();
    assert!(content.contains("News A HD"));
    assert!(!content.contains("News A from backup"));
    assert!(content.contains("Movies C"));
    // Three unique channels, numbered 10..12.
    assert!(content.contains("tvg-chno=\"12\""));
    assert!(!content.contains("tvg-chno=\"13\""));
}

#[tokio::test]
async fn epg_flows_into_published_guide_with_channels_first() {
    let mut fixture = fixture().await;
    let playlist = write_temp(PRIMARY_PLAYLIST);
    let guide = write_temp(&guide_within_horizon());

    let source = StreamSource::new("primary", StreamSourceType::M3u, file_url(&playlist));
    let epg = EpgSource::new("guide", EpgSourceType::Xmltv, file_url(&guide));
    fixture.repo.insert_source(source.clone()).await;
    fixture.repo.insert_epg_source(epg.clone()).await;
    fixture.repo.assign_source(fixture.proxy.id, source.id, 1).await;
    fixture.repo.assign_epg_source(fixture.proxy.id, epg.id, 1).await;
    fixture._files.push(playlist);
    fixture._files.push(guide);

    let token = CancellationToken::new();
    fixture
        .service
        .ingest_stream_source(&token, &source)
        .await
        .unwrap();
    let (updated_epg, stored) = fixture
        .service
        .ingest_epg_source(&token, &epg)
        .await
        .unwrap();
    assert_eq!(stored, 2);
    assert_eq!(updated_epg.detected_timezone.as_deref(), Some("+01:00"));
    fixture.repo.update_epg_source(&updated_epg).await;

    let report = run_pipeline(&fixture).await;
    assert!(report.success, "pipeline failed: {:?}", report.error_message);

    let output = fixture
        .output_dir
        .path()
        .join(format!("{}.xml", fixture.proxy.id));
    let content = std::fs::read_to_string(&output).unwrap();

    assert!(content.starts_with("<?xml version=\"1.0\" encoding=\"UTF-8\"?>"));
    // Channel elements precede programme elements.
    let channel_pos = content.find("<channel id=\"ch1\">").unwrap();
    let programme_pos = content.find("<programme").unwrap();
    assert!(channel_pos < programme_pos);
    assert!(content.contains("Morning News"));
    // The orphan programme's channel never made it into the guide.
    assert!(!content.contains("Orphan"));

    // No partially published files remain next to the output.
    let leftovers: Vec<_> = std::fs::read_dir(fixture.output_dir.path())
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
        .collect();
    assert!(leftovers.is_empty());
}

#[tokio::test]
async fn guard_times_out_while_an_ingestion_hangs() {
    let fixture = fixture().await;
    let mut deps = deps_for(&fixture).await;
    deps.config.ingestion_guard.poll_interval = std::time::Duration::from_millis(10);
    deps.config.ingestion_guard.max_wait = std::time::Duration::from_millis(100);

    // An ingestion that never finishes.
    fixture
        .service
        .state_manager()
        .start(ulid::Ulid::new(), "stuck source")
        .await
        .unwrap();

    let temp = tempfile::tempdir().unwrap();
    let state = PipelineState::new(fixture.proxy.clone(), temp.keep(), "");
    let report = Pipeline::standard(&deps)
        .execute(&CancellationToken::new(), state)
        .await;

    assert!(!report.success);
    assert_eq!(report.stage_failed.as_deref(), Some("ingestion_guard"));
    assert!(report
        .error_message
        .as_deref()
        .unwrap()
        .contains("stuck source"));
}
