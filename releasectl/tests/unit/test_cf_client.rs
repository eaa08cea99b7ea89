//! `cf` client tests with scripted templates standing in for the CLI

use std::sync::Arc;
use std::time::Duration;

use releasectl::collaborators::PlatformCredentials;
use releasectl::command::{Operation, TemplateRegistry, ToolVersion};
use releasectl::errors::DeployError;
use releasectl::filesys::Dir;
use releasectl::logs::{LogContext, LogLevel, MemoryLogSink};
use releasectl::platform::{CfCliClient, PlatformClient, PlatformContext};
use releasectl::process::{PoolBounds, ProcessExecutor, RetryPolicy};
use secrecy::SecretString;
use task_api::ReleaseMarker;

const APPS: &str = "\
Getting apps in org payments / space prod as deployer...

name     requested state   processes   routes
web-10   started           web:2/2     web.apps.example.com
web-9    stopped           web:0/0
api-1    started           web:1/1     api.apps.example.com
";

fn registry() -> TemplateRegistry {
    let v7 = ToolVersion::CfV7;
    let mut registry = TemplateRegistry::empty();
    registry.register(Operation::CfApi, v7, "echo api ${ENDPOINT} ${COMMAND_FLAGS} >> calls.log");
    registry.register(
        Operation::CfAuth,
        v7,
        "test \"$CF_USERNAME:$CF_PASSWORD\" = \"$(cat expected-credentials)\" || { echo 'Credentials were rejected' >&2; exit 1; }",
    );
    registry.register(Operation::CfTarget, v7, "echo target ${ORG} ${SPACE} >> calls.log");
    registry.register(Operation::CfListApps, v7, "cat apps.txt");
    registry.register(Operation::CfAppGuid, v7, "echo; echo guid-${APP_NAME}");
    registry.register(Operation::CfAppEnv, v7, "cat env-${APP_NAME}.txt 2>/dev/null || true");
    registry.register(
        Operation::CfScale,
        v7,
        "echo scale ${APP_NAME} ${INSTANCE_COUNT} ${COMMAND_FLAGS} >> calls.log",
    );
    registry.register(
        Operation::CfMapRoute,
        v7,
        "echo map ${APP_NAME} ${DOMAIN} ${ROUTE_OPTIONS} >> calls.log",
    );
    registry
}

struct Fixture {
    home: Dir,
    client: CfCliClient,
    sink: Arc<MemoryLogSink>,
    log: LogContext,
}

impl Fixture {
    async fn new() -> Self {
        let home = Dir::new(std::env::temp_dir().join(format!("cf-test-{}", uuid::Uuid::new_v4())));
        home.create().await.unwrap();
        home.file("apps.txt").write_string(APPS).await.unwrap();
        home.file("expected-credentials")
            .write_string("deployer:s3cret")
            .await
            .unwrap();
        home.file("env-web-10.txt")
            .write_string("User-Provided:\nHARNESS__STATUS__IDENTIFIER: ACTIVE\n")
            .await
            .unwrap();

        let executor = Arc::new(
            ProcessExecutor::new(PoolBounds::default(), PoolBounds::default(), RetryPolicy::once())
                .unwrap(),
        );
        let sink = Arc::new(MemoryLogSink::new());
        Self {
            client: CfCliClient::new(executor, Arc::new(registry())),
            log: LogContext::new(sink.clone(), "Cf"),
            sink,
            home,
        }
    }

    fn ctx(&self, password: &str) -> PlatformContext {
        PlatformContext {
            home: self.home.path().to_string_lossy().into_owned(),
            credentials: Arc::new(PlatformCredentials {
                endpoint: "https://api.sys.example.com".to_string(),
                organization: "payments".to_string(),
                space: "prod".to_string(),
                username: "deployer".to_string(),
                password: SecretString::from(password.to_string()),
                skip_ssl_validation: true,
            }),
            cli_version: ToolVersion::CfV7,
            timeout: Duration::from_secs(10),
        }
    }

    async fn calls(&self) -> Vec<String> {
        self.home
            .file("calls.log")
            .read_string()
            .await
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
    }
}

#[tokio::test]
async fn test_login_passes_password_through_environment() {
    let fx = Fixture::new().await;
    fx.client.login(&fx.ctx("s3cret"), &fx.log).await.unwrap();

    assert_eq!(
        fx.calls().await,
        vec![
            "api https://api.sys.example.com --skip-ssl-validation",
            "target payments prod",
        ]
    );
    assert!(fx.sink.lines().iter().all(|l| !l.message.contains("s3cret")));
    fx.home.delete().await.unwrap();
}

#[tokio::test]
async fn test_rejected_login_stops_before_target() {
    let fx = Fixture::new().await;
    let err = fx.client.login(&fx.ctx("wrong"), &fx.log).await.unwrap_err();

    match err {
        DeployError::ToolProcess { output, .. } => {
            assert!(output.contains("Credentials were rejected"))
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(fx.calls().await.len(), 1);
    assert!(fx.sink.contains(LogLevel::Error, "Credentials were rejected"));
    fx.home.delete().await.unwrap();
}

#[tokio::test]
async fn test_list_releases_filters_and_orders_by_revision() {
    let fx = Fixture::new().await;
    let releases = fx
        .client
        .list_releases(&fx.ctx("s3cret"), &fx.log, "web", true)
        .await
        .unwrap();

    let names: Vec<&str> = releases.iter().map(|r| r.name.as_str()).collect();
    assert_eq!(names, vec!["web-9", "web-10"]);
    assert_eq!(releases[1].id, "guid-web-10");
    assert_eq!(releases[1].revision, 10);
    assert_eq!(releases[1].total_instances, 2);
    assert!(releases[1].urls.contains("web.apps.example.com"));
    assert_eq!(releases[1].marker, Some(ReleaseMarker::Active));
    assert_eq!(releases[0].marker, None);
    fx.home.delete().await.unwrap();
}

#[tokio::test]
async fn test_scale_and_map_route_commands() {
    let fx = Fixture::new().await;
    let ctx = fx.ctx("s3cret");

    let scaled = fx.client.scale_release(&ctx, &fx.log, "web-9", 3).await.unwrap();
    assert_eq!(scaled.name, "web-9");
    fx.client
        .map_routes(&ctx, &fx.log, "web-9", &["web.apps.example.com/v2".to_string()])
        .await
        .unwrap();

    assert_eq!(
        fx.calls().await,
        vec![
            "scale web-9 3",
            "map web-9 apps.example.com --hostname web --path /v2",
        ]
    );
    fx.home.delete().await.unwrap();
}

#[tokio::test]
async fn test_unknown_release_is_platform_error() {
    let fx = Fixture::new().await;
    let err = fx
        .client
        .get_release(&fx.ctx("s3cret"), &fx.log, "web-11")
        .await
        .unwrap_err();
    assert!(matches!(err, DeployError::Platform(_)));
    fx.home.delete().await.unwrap();
}
