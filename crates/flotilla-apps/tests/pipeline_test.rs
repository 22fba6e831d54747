mod common;

use common::{CallLog, Harness, REGISTRY, orchestrator_from};
use flotilla_apps::{AliasPipeline, AppError, AppPipeline, ContainerPipeline, FunctionPipeline};
use flotilla_core::{ContainerConfig, FrameworkVersion, FunctionConfig};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;

fn container(h: &Harness, name: &str, config: ContainerConfig) -> ContainerPipeline {
    ContainerPipeline::new(name, config, &h.context())
}

fn function(h: &Harness, name: &str, config: FunctionConfig) -> FunctionPipeline {
    FunctionPipeline::new(name, config, &h.context())
}

/// nvm.sh を置いて「インストール済み」にする
fn install_fake_nvm(h: &Harness) {
    std::fs::create_dir_all(&h.nvm_dir).unwrap();
    std::fs::write(h.nvm_dir.join("nvm.sh"), "# nvm\n").unwrap();
}

#[tokio::test]
async fn test_container_build_spec() {
    let dir = tempdir().unwrap();
    let h = Harness::new(dir.path());
    let pipeline = container(&h, "web", ContainerConfig::default());

    pipeline.build(&h.step("web")).await.unwrap();

    let specs = h.builder.specs.lock().unwrap().clone();
    assert_eq!(specs.len(), 1);
    let spec = &specs[0];
    let uri = format!("{}/acme-web", REGISTRY);
    assert_eq!(spec.context_dir, dir.path());
    assert_eq!(spec.dockerfile, dir.path().join("apps/web/Dockerfile"));
    assert_eq!(
        spec.tags,
        vec![
            "acme-web".to_string(),
            format!("{}:abc1234", uri),
            format!("{}:dev-latest", uri),
        ]
    );
    assert_eq!(spec.cache_from, vec![format!("{}:dev-latest", uri)]);
    assert_eq!(spec.build_args["APP_PATH"], "apps/web");
    assert_eq!(spec.build_args["PROJECT_PATH"], "apps/web");
    assert_eq!(spec.build_args["APP_NAME"], "web");
    assert_eq!(spec.build_args["TAG"], "abc1234");
    assert_eq!(spec.platform, "linux/amd64");
}

#[tokio::test]
async fn test_container_push_tags() {
    let dir = tempdir().unwrap();
    let h = Harness::new(dir.path());
    let pipeline = container(&h, "web", ContainerConfig::default());

    pipeline.push(&h.step("web")).await.unwrap();

    assert_eq!(*h.registry.repositories.lock().unwrap(), vec!["acme-web".to_string()]);
    let pushes = h.registry.pushes.lock().unwrap().clone();
    assert_eq!(
        pushes,
        vec![(
            format!("{}/acme-web", REGISTRY),
            vec!["abc1234".to_string(), "dev-latest".to_string()]
        )]
    );
}

#[tokio::test]
async fn test_explicit_image_skips_build_and_push() {
    let dir = tempdir().unwrap();
    let h = Harness::new(dir.path());
    let config = ContainerConfig {
        image: Some("nginx:1.27".to_string()),
        ..Default::default()
    };
    let pipeline = container(&h, "web", config);
    let step = h.step("web");

    pipeline.build(&step).await.unwrap();
    pipeline.push(&step).await.unwrap();
    pipeline.deploy(&step).await.unwrap();

    assert!(h.builder.specs.lock().unwrap().is_empty());
    assert!(h.registry.pushes.lock().unwrap().is_empty());
    let registered = h.orchestrator.registered.lock().unwrap().clone();
    assert_eq!(registered.len(), 1);
    assert_eq!(registered[0].1, "web");
    assert_eq!(registered[0].2, "nginx:1.27");
}

#[tokio::test]
async fn test_container_deploy_updates_service() {
    let dir = tempdir().unwrap();
    let h = Harness::new(dir.path());
    let pipeline = container(&h, "web", ContainerConfig::default());

    pipeline.deploy(&h.step("web")).await.unwrap();

    let registered = h.orchestrator.registered.lock().unwrap().clone();
    assert_eq!(
        registered,
        vec![(
            "arn:aws:ecs:us-east-1:123:task-definition/dev-web:7".to_string(),
            "web".to_string(),
            format!("{}/acme-web:dev-latest", REGISTRY),
        )]
    );

    let updated = h.orchestrator.updated.lock().unwrap().clone();
    assert_eq!(
        updated,
        vec![(
            "dev-acme".to_string(),
            "dev-acme-web".to_string(),
            "arn:aws:ecs:us-east-1:123:task-definition/dev-web:7-next".to_string(),
        )]
    );

    let waited = h.orchestrator.waited.lock().unwrap().clone();
    assert_eq!(waited, vec![("dev-acme-web".to_string(), Duration::from_secs(300))]);
    assert!(h.orchestrator.shortened.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_container_deploy_with_overrides() {
    let dir = tempdir().unwrap();
    let h = Harness::new(dir.path());
    let config = ContainerConfig {
        cluster: Some("shared".to_string()),
        service_name: Some("dev-api".to_string()),
        task_definition_arn: Some("arn:aws:ecs:us-east-1:123:task-definition/api:3".to_string()),
        timeout: 60,
        unsafe_mode: true,
        ..Default::default()
    };
    let pipeline = container(&h, "api", config);

    pipeline.deploy(&h.step("api")).await.unwrap();

    let registered = h.orchestrator.registered.lock().unwrap().clone();
    assert_eq!(registered[0].0, "arn:aws:ecs:us-east-1:123:task-definition/api:3");
    let updated = h.orchestrator.updated.lock().unwrap().clone();
    assert_eq!(updated[0].0, "shared");
    assert_eq!(updated[0].1, "dev-api");
    assert_eq!(*h.orchestrator.shortened.lock().unwrap(), vec!["dev-api".to_string()]);
    assert_eq!(
        h.orchestrator.waited.lock().unwrap()[0].1,
        Duration::from_secs(60)
    );
}

#[tokio::test]
async fn test_skip_deploy() {
    let dir = tempdir().unwrap();
    let h = Harness::new(dir.path());
    let config = ContainerConfig {
        skip_deploy: true,
        ..Default::default()
    };
    let pipeline = container(&h, "web", config);

    pipeline.deploy(&h.step("web")).await.unwrap();

    assert!(h.orchestrator.registered.lock().unwrap().is_empty());
    assert!(
        h.output
            .lines_for("web")
            .iter()
            .any(|l| l.contains("skip_deploy"))
    );
}

#[tokio::test]
async fn test_missing_cluster_is_not_found() {
    let dir = tempdir().unwrap();
    let h = Harness::new(dir.path());
    let mut orchestrator = orchestrator_from(&h.orchestrator, h.log.clone());
    orchestrator.cluster_exists = false;
    let h = h.with_orchestrator(orchestrator);
    let pipeline = container(&h, "web", ContainerConfig::default());

    let err = pipeline.deploy(&h.step("web")).await.unwrap_err();

    assert!(matches!(err, AppError::NotFound(_)), "unexpected error: {err}");
    assert!(err.to_string().contains("dev-acme"));
}

#[tokio::test]
async fn test_unknown_service_is_not_found() {
    let dir = tempdir().unwrap();
    let h = Harness::new(dir.path());
    let pipeline = container(&h, "billing", ContainerConfig::default());

    let err = pipeline.deploy(&h.step("billing")).await.unwrap_err();

    assert!(matches!(err, AppError::NotFound(_)));
    assert!(h.orchestrator.registered.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_unstable_service_times_out() {
    let dir = tempdir().unwrap();
    let h = Harness::new(dir.path());
    let mut orchestrator = orchestrator_from(&h.orchestrator, h.log.clone());
    orchestrator.stable = false;
    let h = h.with_orchestrator(orchestrator);
    let pipeline = container(&h, "web", ContainerConfig::default());

    let err = pipeline.deploy(&h.step("web")).await.unwrap_err();

    match err {
        AppError::Timeout { seconds, .. } => assert_eq!(seconds, 300),
        other => panic!("expected timeout, got {other}"),
    }
}

#[tokio::test]
async fn test_destroy_declined() {
    let dir = tempdir().unwrap();
    let h = Harness::new(dir.path());
    let pipeline = container(&h, "web", ContainerConfig::default());

    let err = pipeline.destroy(&h.step("web"), false).await.unwrap_err();

    assert!(err.is_user_cancelled());
    assert!(h.orchestrator.deregistered.lock().unwrap().is_empty());
    let asked = h.prompt.asked.lock().unwrap().clone();
    assert_eq!(asked.len(), 1);
    assert!(asked[0].0.contains("web"));
    assert_eq!(asked[0].1, h.orchestrator.definitions);
}

#[tokio::test]
async fn test_destroy_auto_approve() {
    let dir = tempdir().unwrap();
    let h = Harness::new(dir.path());
    let pipeline = container(&h, "web", ContainerConfig::default());

    pipeline.destroy(&h.step("web"), true).await.unwrap();

    assert!(h.prompt.asked.lock().unwrap().is_empty());
    assert_eq!(*h.orchestrator.deregistered.lock().unwrap(), h.orchestrator.definitions);
    assert_eq!(h.log.calls()[0], "list:dev-web");
}

#[tokio::test]
async fn test_destroy_without_definitions() {
    let dir = tempdir().unwrap();
    let h = Harness::new(dir.path());
    let mut orchestrator = orchestrator_from(&h.orchestrator, h.log.clone());
    orchestrator.definitions.clear();
    let h = h.with_orchestrator(orchestrator);
    let pipeline = container(&h, "web", ContainerConfig::default());

    pipeline.destroy(&h.step("web"), false).await.unwrap();

    assert!(h.prompt.asked.lock().unwrap().is_empty());
    assert!(h.orchestrator.deregistered.lock().unwrap().is_empty());
}

#[test]
fn test_container_explain() {
    let dir = tempdir().unwrap();
    let h = Harness::new(dir.path());
    let pipeline = container(&h, "web", ContainerConfig::default());

    let text = pipeline.explain().unwrap();

    assert!(text.starts_with("# web (ecs)\n"));
    assert!(text.contains("docker build --platform linux/amd64"));
    assert!(text.contains(&format!("docker push {}/acme-web:abc1234", REGISTRY)));
    assert!(text.contains("aws ecs update-service --cluster dev-acme --service dev-acme-web"));
    assert!(h.log.calls().is_empty());
}

#[tokio::test]
async fn test_alias_does_nothing() {
    let dir = tempdir().unwrap();
    let h = Harness::new(dir.path());
    let pipeline = AliasPipeline::new("backend");
    let step = h.step("backend");

    pipeline.build(&step).await.unwrap();
    pipeline.push(&step).await.unwrap();
    pipeline.deploy(&step).await.unwrap();
    pipeline.destroy(&step, false).await.unwrap();

    assert!(h.log.calls().is_empty());
    assert!(pipeline.explain().unwrap().starts_with("# backend (alias)"));
}

#[tokio::test]
async fn test_serverless_v3_deploy() {
    let dir = tempdir().unwrap();
    let h = Harness::new(dir.path());
    install_fake_nvm(&h);
    let config = FunctionConfig {
        framework: FrameworkVersion::V3,
        ..Default::default()
    };
    let pipeline = function(&h, "notifier", config);

    pipeline.deploy(&h.step("notifier")).await.unwrap();

    let nvm = h.nvm_dir.join("nvm.sh").display().to_string();
    let scripts = h.runner.scripts();
    assert_eq!(
        scripts,
        vec![
            format!("source {} && nvm --version", nvm),
            format!("source {} && nvm install 20", nvm),
            format!("source {} && nvm use 20 && npm install --save-dev", nvm),
            format!(
                "source {} && nvm use 20 && npx serverless deploy --config=serverless.yml --param=\"service=notifier\" --region=us-east-1 --aws-profile=acme-dev --stage=dev --verbose",
                nvm
            ),
        ]
    );

    let commands = h.runner.commands.lock().unwrap().clone();
    assert_eq!(commands[0].cwd, Some(dir.path().to_path_buf()));
    assert_eq!(commands[3].cwd, Some(dir.path().join("apps/notifier")));
    assert_eq!(commands[3].args[0], "-c");
}

#[tokio::test]
async fn test_serverless_legacy_remove_with_overrides() {
    let dir = tempdir().unwrap();
    let h = Harness::new(dir.path());
    install_fake_nvm(&h);
    let config = FunctionConfig {
        path: Some(PathBuf::from("lambdas/mailer")),
        file: "sls.yml".to_string(),
        aws_region: Some("eu-west-1".to_string()),
        aws_profile: Some("mailer".to_string()),
        force: true,
        ..Default::default()
    };
    let pipeline = function(&h, "mailer", config);

    pipeline.destroy(&h.step("mailer"), false).await.unwrap();

    let scripts = h.runner.scripts();
    let remove = scripts.last().unwrap();
    assert!(remove.ends_with(
        "npx serverless remove --config sls.yml --service mailer --verbose --region eu-west-1 --aws-profile mailer --stage dev"
    ));
    assert!(!remove.contains("--force"));
    let commands = h.runner.commands.lock().unwrap().clone();
    assert_eq!(
        commands.last().unwrap().cwd,
        Some(dir.path().join("lambdas/mailer"))
    );
    assert!(h.prompt.asked.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_serverless_yarn_and_custom_domain() {
    let dir = tempdir().unwrap();
    let h = Harness::new(dir.path());
    install_fake_nvm(&h);
    let config = FunctionConfig {
        use_yarn: true,
        create_custom_domain: true,
        ..Default::default()
    };
    let pipeline = function(&h, "api", config);

    pipeline.deploy(&h.step("api")).await.unwrap();

    let scripts = h.runner.scripts();
    assert_eq!(scripts.len(), 5);
    assert!(scripts[2].ends_with("nvm use 20 && yarn install --save-dev"));
    assert!(scripts[3].contains("yarn serverless create_domain --verbose --region us-east-1"));
    assert!(scripts[4].contains("yarn serverless deploy --config serverless.yml --service api"));
}

#[tokio::test]
async fn test_serverless_remove_domain_after_remove() {
    let dir = tempdir().unwrap();
    let h = Harness::new(dir.path());
    install_fake_nvm(&h);
    let config = FunctionConfig {
        create_custom_domain: true,
        ..Default::default()
    };
    let pipeline = function(&h, "api", config);

    pipeline.destroy(&h.step("api"), true).await.unwrap();

    let scripts = h.runner.scripts();
    let remove = scripts.iter().position(|s| s.contains("serverless remove")).unwrap();
    let domain = scripts.iter().position(|s| s.contains("delete_domain")).unwrap();
    assert!(remove < domain);
}

#[tokio::test]
async fn test_nvmrc_overrides_node_version() {
    let dir = tempdir().unwrap();
    let h = Harness::new(dir.path());
    install_fake_nvm(&h);
    let app_dir = dir.path().join("apps/notifier");
    std::fs::create_dir_all(&app_dir).unwrap();
    std::fs::write(app_dir.join(".nvmrc"), "18.19.0\n").unwrap();
    let pipeline = function(&h, "notifier", FunctionConfig::default());

    assert_eq!(pipeline.node_version().unwrap(), "18.19.0");
    pipeline.deploy(&h.step("notifier")).await.unwrap();

    let scripts = h.runner.scripts();
    assert!(scripts[1].ends_with("nvm install 18.19.0"));
    assert!(scripts[3].contains("nvm use 18.19.0 && npx serverless deploy"));
}

#[tokio::test]
async fn test_installs_nvm_when_missing() {
    let dir = tempdir().unwrap();
    let h = Harness::new(dir.path());
    let pipeline = function(&h, "notifier", FunctionConfig::default());

    pipeline.deploy(&h.step("notifier")).await.unwrap();

    let scripts = h.runner.scripts();
    assert_eq!(
        scripts[0],
        "curl -o- https://raw.githubusercontent.com/nvm-sh/nvm/v0.39.7/install.sh | bash"
    );
    assert!(scripts.iter().all(|s| !s.ends_with("nvm --version")));
}

#[tokio::test]
async fn test_reinstalls_nvm_on_version_mismatch() {
    let dir = tempdir().unwrap();
    let mut h = Harness::new(dir.path());
    install_fake_nvm(&h);
    let runner = common::FakeRunner::with_version(h.log.clone(), "0.35.0");
    h.runner = Arc::new(runner);
    let pipeline = function(&h, "notifier", FunctionConfig::default());

    pipeline.deploy(&h.step("notifier")).await.unwrap();

    let scripts = h.runner.scripts();
    assert!(scripts[0].ends_with("nvm --version"));
    assert!(
        scripts[1].starts_with("curl -o- https://raw.githubusercontent.com/nvm-sh/nvm/v0.39.7/")
    );
}

#[test]
fn test_function_explain_has_no_side_effects() {
    let dir = tempdir().unwrap();
    let h = Harness::new(dir.path());
    let pipeline = function(&h, "notifier", FunctionConfig::default());

    let text = pipeline.explain().unwrap();

    assert!(text.starts_with("# notifier (serverless)\n"));
    assert!(text.contains(&format!("cd {}", dir.path().join("apps/notifier").display())));
    assert!(text.contains("npx serverless deploy --config serverless.yml --service notifier"));
    assert!(h.runner.scripts().is_empty());
}

#[tokio::test]
async fn test_serverless_force_applies_to_deploy_only() {
    let dir = tempdir().unwrap();
    let h = Harness::new(dir.path());
    install_fake_nvm(&h);
    let config = FunctionConfig {
        force: true,
        ..Default::default()
    };
    let pipeline = function(&h, "notifier", config);

    pipeline.deploy(&h.step("notifier")).await.unwrap();
    pipeline.destroy(&h.step("notifier"), true).await.unwrap();

    let scripts = h.runner.scripts();
    let deploy = scripts.iter().find(|s| s.contains("serverless deploy")).unwrap();
    let remove = scripts.iter().find(|s| s.contains("serverless remove")).unwrap();
    assert!(deploy.ends_with(" --force"));
    assert!(!remove.contains("--force"));
}

#[test]
fn test_function_explain_reports_unreadable_nvmrc() {
    let dir = tempdir().unwrap();
    let h = Harness::new(dir.path());
    let service_dir = dir.path().join("apps/notifier");
    std::fs::create_dir_all(&service_dir).unwrap();
    std::fs::write(service_dir.join(".nvmrc"), [0xff, 0xfe, b'\n']).unwrap();
    let pipeline = function(&h, "notifier", FunctionConfig::default());

    let err = pipeline.explain().unwrap_err();

    assert!(matches!(err, AppError::Io(_)));
    assert!(h.runner.scripts().is_empty());
}

#[test]
fn test_call_log_position() {
    let log = CallLog::default();
    log.push("a");
    log.push("b");
    assert_eq!(log.position("b"), Some(1));
    assert_eq!(log.position("c"), None);
}
