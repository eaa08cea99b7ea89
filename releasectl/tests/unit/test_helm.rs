//! Package-manager client tests against scripted templates

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use releasectl::cache::OverrideFileCache;
use releasectl::command::{CommandFlags, Operation, TemplateRegistry, ToolVersion};
use releasectl::errors::DeployError;
use releasectl::filesys::Dir;
use releasectl::helm::{HelmClient, HelmContext};
use releasectl::logs::{LogContext, LogLevel, MemoryLogSink};
use releasectl::process::{PoolBounds, ProcessExecutor, RetryPolicy};

struct Fixture {
    root: Dir,
    client: HelmClient,
    sink: Arc<MemoryLogSink>,
    log: LogContext,
}

impl Fixture {
    async fn new(registry: TemplateRegistry) -> Self {
        let root = Dir::new(
            std::env::temp_dir().join(format!("helm-test-{}", uuid::Uuid::new_v4())),
        );
        root.create().await.unwrap();
        let executor = Arc::new(
            ProcessExecutor::new(PoolBounds::default(), PoolBounds::default(), RetryPolicy::once())
                .unwrap(),
        );
        let overrides = Arc::new(OverrideFileCache::new(
            root.subdir("overrides"),
            Duration::from_secs(1800),
        ));
        let sink = Arc::new(MemoryLogSink::new());
        Self {
            client: HelmClient::new(executor, Arc::new(registry), overrides),
            log: LogContext::new(sink.clone(), "Helm"),
            sink,
            root,
        }
    }

    fn ctx(&self, kubeconfig: Option<PathBuf>) -> HelmContext {
        HelmContext {
            version: ToolVersion::HelmV3,
            namespace: "prod".to_string(),
            kubeconfig,
            cloud_key_path: None,
            working_dir: self.root.path().to_path_buf(),
            timeout: Duration::from_secs(10),
            flags: CommandFlags::none(),
        }
    }
}

#[tokio::test]
async fn test_history_not_found_is_empty() {
    let mut registry = TemplateRegistry::empty();
    registry.register(
        Operation::HelmReleaseHistory,
        ToolVersion::HelmV3,
        "echo 'Error: release: not found' >&2; exit 1 ${COMMAND_FLAGS}",
    );
    let fx = Fixture::new(registry).await;

    let history = fx
        .client
        .release_history(&fx.ctx(None), &fx.log, "web")
        .await
        .unwrap();
    assert!(history.is_empty());
    fx.root.delete().await.unwrap();
}

#[tokio::test]
async fn test_history_parses_table() {
    let mut registry = TemplateRegistry::empty();
    registry.register(
        Operation::HelmReleaseHistory,
        ToolVersion::HelmV3,
        "printf 'REVISION\\tSTATUS\\tCHART\\tDESCRIPTION\\n4\\tdeployed\\tnginx-1.2.0\\tUpgrade complete\\n' ${COMMAND_FLAGS}",
    );
    let fx = Fixture::new(registry).await;

    let history = fx
        .client
        .release_history(&fx.ctx(None), &fx.log, "web")
        .await
        .unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].revision, 4);
    assert_eq!(history[0].chart, "nginx-1.2.0");
    fx.root.delete().await.unwrap();
}

#[tokio::test]
async fn test_rollback_failure_is_tool_error() {
    let mut registry = TemplateRegistry::empty();
    registry.register(
        Operation::HelmRollback,
        ToolVersion::HelmV3,
        "echo 'Error: release: not found' >&2; exit 1 # ${RELEASE_NAME} ${REVISION} ${COMMAND_FLAGS}",
    );
    let fx = Fixture::new(registry).await;

    let err = fx
        .client
        .rollback(&fx.ctx(None), &fx.log, "web", 3)
        .await
        .unwrap_err();
    assert!(matches!(err, DeployError::ToolProcess { .. }));
    assert!(fx.sink.contains(LogLevel::Error, "release: not found"));
    fx.root.delete().await.unwrap();
}

#[tokio::test]
async fn test_kubeconfig_prefix() {
    let mut registry = TemplateRegistry::empty();
    registry.register(
        Operation::HelmVersion,
        ToolVersion::HelmV3,
        "KUBECONFIG=${KUBECONFIG_PATH} echo v3.12.0 ${COMMAND_FLAGS}",
    );
    let fx = Fixture::new(registry).await;

    let version = fx.client.version(&fx.ctx(None), &fx.log).await.unwrap();
    assert_eq!(version, "v3.12.0");
    assert!(!fx.sink.contains(LogLevel::Debug, "KUBECONFIG="));

    let kubeconfig = fx.root.path().join("kube.yaml");
    fx.client
        .version(&fx.ctx(Some(kubeconfig.clone())), &fx.log)
        .await
        .unwrap();
    assert!(fx.sink.contains(
        LogLevel::Debug,
        &format!("KUBECONFIG={}", kubeconfig.display())
    ));
    fx.root.delete().await.unwrap();
}

#[tokio::test]
async fn test_cloud_key_is_exported() {
    let mut registry = TemplateRegistry::empty();
    registry.register(
        Operation::HelmRepoUpdate,
        ToolVersion::HelmV3,
        "KUBECONFIG=${KUBECONFIG_PATH} echo \"key=$GOOGLE_APPLICATION_CREDENTIALS\" ${COMMAND_FLAGS}",
    );
    let fx = Fixture::new(registry).await;
    let mut ctx = fx.ctx(None);
    ctx.cloud_key_path = Some(PathBuf::from("/secrets/gcp.json"));

    let result = fx.client.repo_update(&ctx, &fx.log).await.unwrap();
    assert_eq!(result.stdout.trim(), "key=/secrets/gcp.json");
    fx.root.delete().await.unwrap();
}

#[tokio::test]
async fn test_install_writes_override_files_once() {
    let mut registry = TemplateRegistry::empty();
    registry.register(
        Operation::HelmInstall,
        ToolVersion::HelmV3,
        "KUBECONFIG=${KUBECONFIG_PATH} echo ${RELEASE_NAME} ${CHART_REFERENCE} ${COMMAND_FLAGS} --namespace ${NAMESPACE} ${OVERRIDE_VALUES}",
    );
    let fx = Fixture::new(registry).await;
    let ctx = fx.ctx(None);
    let overrides = vec!["replicas: 2\n".to_string(), "  ".to_string()];

    let first = fx
        .client
        .install(&ctx, &fx.log, "web", "stable/nginx", &overrides)
        .await
        .unwrap();
    let second = fx
        .client
        .install(&ctx, &fx.log, "web", "stable/nginx", &overrides)
        .await
        .unwrap();

    // Blank entries are skipped; identical content maps to one file
    assert_eq!(first.stdout.matches("-f ").count(), 1);
    assert_eq!(first.stdout, second.stdout);
    assert!(first.stdout.starts_with("web stable/nginx --namespace prod -f "));
    fx.root.delete().await.unwrap();
}

#[tokio::test]
async fn test_missing_template_runs_nothing() {
    let fx = Fixture::new(TemplateRegistry::empty()).await;

    let err = fx
        .client
        .uninstall(&fx.ctx(None), &fx.log, "web")
        .await
        .unwrap_err();
    assert!(matches!(err, DeployError::Configuration(_)));
    assert!(!fx.sink.contains(LogLevel::Debug, "Executing"));
    fx.root.delete().await.unwrap();
}

#[tokio::test]
async fn test_release_name_is_quoted_for_history() {
    let mut registry = TemplateRegistry::empty();
    registry.register(
        Operation::HelmReleaseHistory,
        ToolVersion::HelmV3,
        "printf 'REVISION\\tSTATUS\\tCHART\\tDESCRIPTION\\n1\\tdeployed\\tnginx-1.0.0\\t%s\\n' \
         ${RELEASE_NAME} ${COMMAND_FLAGS}",
    );
    let fx = Fixture::new(registry).await;

    let history = fx
        .client
        .release_history(&fx.ctx(None), &fx.log, "web; touch injected")
        .await
        .unwrap();

    assert_eq!(history.len(), 1);
    assert_eq!(history[0].description, "web; touch injected");
    assert!(!fx.root.path().join("injected").exists());
    fx.root.delete().await.unwrap();
}

#[tokio::test]
async fn test_fetch_quotes_repo_and_chart() {
    let mut registry = TemplateRegistry::empty();
    registry.register(
        Operation::HelmFetch,
        ToolVersion::HelmV3,
        "printf '%s\\n' ${REPO_NAME}/${CHART_NAME} ${COMMAND_FLAGS}",
    );
    let fx = Fixture::new(registry).await;
    let dest = fx.root.path().join("charts");

    let result = fx
        .client
        .fetch_chart(&fx.ctx(None), &fx.log, "my repo", "it's", None, &dest)
        .await
        .unwrap();

    assert_eq!(result.stdout, "my repo/it's\n");
    fx.root.delete().await.unwrap();
}
