//! Build pipeline against a scripted registry and command runner.

use std::path::Path;
use std::sync::Arc;

use serde_json::{Value, json};
use skyhook_aws::credentials::SHARED_CREDENTIALS_FILE_ENV;
use skyhook_aws::testing::ScriptedService;
use skyhook_aws::{AwsProvider, ProviderError, RetryConfig, ServiceRegistry};
use skyhook_core::{DeploymentOptions, EnvSnapshot, MemoryDiagnostics, ServiceConfig};
use skyhook_images::pipeline::UNENCRYPTED_CREDENTIALS_WARNING;
use skyhook_images::testing::ScriptedRunner;
use skyhook_images::{BuildRequest, CommandFailure, ErrorKind, ImagePipeline};
use tempfile::TempDir;

const REPOSITORY_URI: &str = "999999999999.dkr.ecr.us-east-1.amazonaws.com/skyhook-svc-dev";
const SHA: &str = "6bb600b4d6e1d7cf521097177dd0c4e9ea373edb91984a505333be8ac9455d38";
const RETRIED_SHA: &str = "1f3e0f6f2bb40b7a4e1f5bd84a0a5c6dc3a6fd4e4b0f59b2b7d38e4e1c0a9e77";
const AUTH_TOKEN: &str = "QVdTOnNlY3JldC1wYXNzd29yZA==";
const PROXY_ENDPOINT: &str = "https://999999999999.dkr.ecr.us-east-1.amazonaws.com";

struct Fixture {
    dir: TempDir,
    ecr: ScriptedService,
    runner: ScriptedRunner,
    diagnostics: Arc<MemoryDiagnostics>,
    pipeline: ImagePipeline,
}

fn push_output(sha: &str) -> String {
    format!("The push refers to repository [{REPOSITORY_URI}]\nbase: digest: sha256:{sha} size: 1787\n")
}

fn existing_repository() -> ScriptedService {
    ScriptedService::new().respond(
        "describeRepositories",
        Ok(json!({"repositories": [{"repositoryName": "skyhook-svc-dev", "repositoryUri": REPOSITORY_URI}]})),
    )
}

fn with_authorization(ecr: ScriptedService) -> ScriptedService {
    ecr.respond(
        "getAuthorizationToken",
        Ok(json!({"authorizationData": [{"authorizationToken": AUTH_TOKEN, "proxyEndpoint": PROXY_ENDPOINT}]})),
    )
}

fn write_dockerfile(dir: &Path, relative: &str) {
    let path = dir.join(relative);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, "FROM public.ecr.aws/lambda/nodejs:18\n").unwrap();
}

fn fixture_with(ecr: ScriptedService, runner: ScriptedRunner, provider: Value) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let service = ServiceConfig::from_json(
        &json!({
            "service": "svc",
            "serviceDir": dir.path(),
            "provider": provider,
        })
        .to_string(),
    )
    .unwrap();

    let diagnostics = Arc::new(MemoryDiagnostics::new());
    let pipeline = pipeline_for(service, &ecr, &runner, diagnostics.clone());
    Fixture {
        dir,
        ecr,
        runner,
        diagnostics,
        pipeline,
    }
}

fn pipeline_for(
    service: ServiceConfig,
    ecr: &ScriptedService,
    runner: &ScriptedRunner,
    diagnostics: Arc<MemoryDiagnostics>,
) -> ImagePipeline {
    let provider = AwsProvider::builder(service)
        .options(DeploymentOptions::new("dev", "us-east-1"))
        .env(EnvSnapshot::new().with(SHARED_CREDENTIALS_FILE_ENV, "/nonexistent/skyhook/credentials"))
        .registry(ServiceRegistry::new().with("ECR", ecr.factory()))
        .retry(RetryConfig::immediate(2))
        .build()
        .unwrap();
    ImagePipeline::new(Arc::new(provider), Arc::new(runner.clone()), diagnostics)
}

fn fixture(ecr: ScriptedService, runner: ScriptedRunner) -> Fixture {
    let fixture = fixture_with(ecr, runner, json!({}));
    write_dockerfile(fixture.dir.path(), "Dockerfile");
    fixture
}

fn methods(ecr: &ScriptedService) -> Vec<String> {
    ecr.calls().into_iter().map(|call| call.method).collect()
}

#[tokio::test]
async fn test_build_runs_docker_steps_in_order() {
    let runner = ScriptedRunner::new().respond("push", Ok(push_output(SHA)));
    let fixture = fixture(existing_repository(), runner);
    let request = BuildRequest::new("base", "./");

    let image = fixture.pipeline.build(&request).await.unwrap();

    assert_eq!(image.uri, format!("{REPOSITORY_URI}@sha256:{SHA}"));
    assert_eq!(image.digest, format!("sha256:{SHA}"));
    assert_eq!(image.code_sha256, SHA);

    let dockerfile = fixture.dir.path().join("Dockerfile");
    assert_eq!(fixture.pipeline.dockerfile_path(&request), dockerfile);

    let invocations = fixture.runner.invocations();
    let args: Vec<Vec<String>> = invocations.iter().map(|i| i.args.clone()).collect();
    assert_eq!(
        args,
        vec![
            vec!["--version".to_string()],
            vec![
                "build".to_string(),
                "-t".to_string(),
                "skyhook-svc-dev:base".to_string(),
                "-f".to_string(),
                "./Dockerfile".to_string(),
                "./".to_string(),
            ],
            vec![
                "tag".to_string(),
                "skyhook-svc-dev:base".to_string(),
                format!("{REPOSITORY_URI}:base"),
            ],
            vec!["push".to_string(), format!("{REPOSITORY_URI}:base")],
        ]
    );
    assert!(invocations.iter().all(|i| i.program == "docker"));
    assert!(invocations.iter().all(|i| i.cwd == fixture.dir.path()));
    assert_eq!(
        fixture.ecr.calls()[0].params,
        json!({"repositoryNames": ["skyhook-svc-dev"]})
    );
    assert!(fixture.diagnostics.warnings().is_empty());
}

#[tokio::test]
async fn test_custom_dockerfile_inside_context() {
    let runner = ScriptedRunner::new().respond("push", Ok(push_output(SHA)));
    let fixture = fixture_with(existing_repository(), runner, json!({}));
    write_dockerfile(fixture.dir.path(), "images/base/Dockerfile.dev");
    let request = BuildRequest::new("base", "images/base").with_file("Dockerfile.dev");

    fixture.pipeline.build(&request).await.unwrap();

    let build = &fixture.runner.invocations()[1];
    assert_eq!(build.subcommand(), "build");
    assert_eq!(build.args[4], "images/base/Dockerfile.dev");
    assert_eq!(build.args[5], "images/base");
    assert_eq!(build.cwd, fixture.dir.path());
    assert!(build.cwd.join(&build.args[4]).is_file());
}

#[tokio::test]
async fn test_relative_service_dir_resolves_dockerfile_once() {
    let dir = tempfile::tempdir_in(".").unwrap();
    assert!(dir.path().is_relative());
    write_dockerfile(&dir.path().join("app"), "images/base/Dockerfile");
    std::fs::write(
        dir.path().join("service.json"),
        json!({"service": "svc", "serviceDir": "app"}).to_string(),
    )
    .unwrap();

    let service = ServiceConfig::load(dir.path().join("service.json")).unwrap();
    assert!(service.service_dir.is_relative());

    let runner = ScriptedRunner::new().respond("push", Ok(push_output(SHA)));
    let ecr = existing_repository();
    let pipeline = pipeline_for(service, &ecr, &runner, Arc::new(MemoryDiagnostics::new()));

    pipeline
        .build(&BuildRequest::new("base", "images/base"))
        .await
        .unwrap();

    let build = &runner.invocations()[1];
    assert_eq!(build.subcommand(), "build");
    assert_eq!(build.cwd, dir.path().join("app"));
    assert_eq!(build.args[4], "images/base/Dockerfile");
    assert!(build.cwd.join(&build.args[4]).is_file());
    assert!(build.cwd.join(&build.args[5]).is_dir());
}

#[tokio::test]
async fn test_missing_dockerfile_fails_before_any_subprocess() {
    let fixture = fixture_with(existing_repository(), ScriptedRunner::new(), json!({}));

    let err = fixture
        .pipeline
        .build(&BuildRequest::new("base", "./"))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::DockerfileNotAvailable);
    assert!(fixture.runner.invocations().is_empty());
    assert!(fixture.ecr.calls().is_empty());
}

#[tokio::test]
async fn test_docker_not_installed() {
    let runner = ScriptedRunner::new().respond(
        "--version",
        Err(CommandFailure::new("Failed to execute docker: No such file or directory", "")),
    );
    let fixture = fixture(existing_repository(), runner);

    let err = fixture
        .pipeline
        .build(&BuildRequest::new("base", "./"))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::DockerCommandNotAvailable);
    assert!(err.to_string().contains("No such file or directory"));
    assert!(fixture.ecr.calls().is_empty());
}

#[tokio::test]
async fn test_missing_repository_is_created_once_before_build() {
    let ecr = ScriptedService::new()
        .respond(
            "describeRepositories",
            Err(ProviderError::new("The repository with name 'skyhook-svc-dev' does not exist")
                .with_code("RepositoryNotFoundException")),
        )
        .respond(
            "createRepository",
            Ok(json!({"repository": {"repositoryUri": REPOSITORY_URI}})),
        );
    let runner = ScriptedRunner::new().respond("push", Ok(push_output(SHA)));
    let fixture = fixture_with(ecr, runner, json!({"ecr": {"scanOnPush": true}}));
    write_dockerfile(fixture.dir.path(), "Dockerfile");

    let first = fixture.pipeline.build(&BuildRequest::new("base", "./")).await.unwrap();
    let second = fixture.pipeline.build(&BuildRequest::new("worker", "./")).await.unwrap();

    assert_eq!(first.uri, format!("{REPOSITORY_URI}@sha256:{SHA}"));
    assert_eq!(second.uri, first.uri);
    assert_eq!(methods(&fixture.ecr), vec!["describeRepositories", "createRepository"]);
    assert_eq!(
        fixture.ecr.calls()[1].params,
        json!({
            "repositoryName": "skyhook-svc-dev",
            "imageScanningConfiguration": {"scanOnPush": true},
        })
    );
    assert_eq!(
        fixture.runner.subcommands(),
        vec!["--version", "build", "tag", "push", "--version", "build", "tag", "push"]
    );
}

#[tokio::test]
async fn test_other_describe_failures_abort_before_build() {
    let ecr = ScriptedService::new().respond(
        "describeRepositories",
        Err(ProviderError::new("User is not authorized").with_code("AccessDeniedException")),
    );
    let fixture = fixture(ecr, ScriptedRunner::new());

    let err = fixture
        .pipeline
        .build(&BuildRequest::new("base", "./"))
        .await
        .unwrap_err();

    assert_eq!(
        err.kind(),
        ErrorKind::Remote(skyhook_aws::ErrorKind::RemoteCallFailed)
    );
    assert_eq!(methods(&fixture.ecr), vec!["describeRepositories"]);
    assert_eq!(fixture.runner.subcommands(), vec!["--version"]);
}

#[tokio::test]
async fn test_push_auth_failure_logs_in_and_retries_once() {
    let runner = ScriptedRunner::new()
        .respond_once(
            "push",
            Err(CommandFailure::new(
                "docker exited with exit status: 1",
                "no basic auth credentials",
            )),
        )
        .respond("push", Ok(push_output(RETRIED_SHA)))
        .respond("login", Ok("Login Succeeded\n".to_string()));
    let fixture = fixture(with_authorization(existing_repository()), runner);

    let image = fixture
        .pipeline
        .build(&BuildRequest::new("base", "./"))
        .await
        .unwrap();

    assert_eq!(image.digest, format!("sha256:{RETRIED_SHA}"));
    assert_eq!(
        fixture.runner.subcommands(),
        vec!["--version", "build", "tag", "push", "login", "push"]
    );
    let login = &fixture.runner.invocations()[4];
    assert_eq!(
        login.args,
        vec!["login", "--username", "AWS", "--password", "secret-password", PROXY_ENDPOINT]
    );
    assert_eq!(fixture.ecr.calls_to("getAuthorizationToken"), 1);
    assert!(fixture.diagnostics.warnings().is_empty());
}

#[tokio::test]
async fn test_expired_token_warns_about_unencrypted_storage() {
    let runner = ScriptedRunner::new()
        .respond_once(
            "push",
            Err(CommandFailure::new(
                "docker exited with exit status: 1",
                "denied: Your authorization token has expired. Reauthenticate and try again.",
            )),
        )
        .respond("push", Ok(push_output(SHA)))
        .respond(
            "login",
            Ok("WARNING! Your password will be stored unencrypted in /root/.docker/config.json.\nLogin Succeeded\n"
                .to_string()),
        );
    let fixture = fixture(with_authorization(existing_repository()), runner);

    fixture
        .pipeline
        .build(&BuildRequest::new("base", "./"))
        .await
        .unwrap();

    assert_eq!(fixture.runner.subcommands().iter().filter(|s| *s == "login").count(), 1);
    assert_eq!(fixture.diagnostics.warnings(), vec![UNENCRYPTED_CREDENTIALS_WARNING]);
}

#[tokio::test]
async fn test_second_push_failure_is_a_push_error() {
    let runner = ScriptedRunner::new().respond(
        "push",
        Err(CommandFailure::new(
            "docker exited with exit status: 1",
            "no basic auth credentials",
        )),
    );
    let fixture = fixture(with_authorization(existing_repository()), runner);

    let err = fixture
        .pipeline
        .build(&BuildRequest::new("base", "./"))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::DockerPush);
    assert_eq!(
        fixture.runner.subcommands(),
        vec!["--version", "build", "tag", "push", "login", "push"]
    );
}

#[tokio::test]
async fn test_other_push_failures_do_not_log_in() {
    let runner = ScriptedRunner::new().respond(
        "push",
        Err(CommandFailure::new(
            "docker exited with exit status: 1",
            "name unknown: The repository does not exist",
        )),
    );
    let fixture = fixture(with_authorization(existing_repository()), runner);

    let err = fixture
        .pipeline
        .build(&BuildRequest::new("base", "./"))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::DockerPush);
    assert!(err.to_string().contains("name unknown"));
    assert_eq!(fixture.ecr.calls_to("getAuthorizationToken"), 0);
}

#[tokio::test]
async fn test_push_without_digest_is_a_push_error() {
    let runner = ScriptedRunner::new().respond("push", Ok("Everything up-to-date\n".to_string()));
    let fixture = fixture(existing_repository(), runner);

    let err = fixture
        .pipeline
        .build(&BuildRequest::new("base", "./"))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::DockerPush);
}

#[tokio::test]
async fn test_build_failure_stops_before_tag() {
    let runner = ScriptedRunner::new().respond(
        "build",
        Err(CommandFailure::new("docker exited with exit status: 1", "failed to solve: base image")),
    );
    let fixture = fixture(existing_repository(), runner);

    let err = fixture
        .pipeline
        .build(&BuildRequest::new("base", "./"))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::DockerBuild);
    assert_eq!(fixture.runner.subcommands(), vec!["--version", "build"]);
}

#[tokio::test]
async fn test_tag_failure() {
    let runner = ScriptedRunner::new().respond(
        "tag",
        Err(CommandFailure::new("docker exited with exit status: 1", "No such image")),
    );
    let fixture = fixture(existing_repository(), runner);

    let err = fixture
        .pipeline
        .build(&BuildRequest::new("base", "./"))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::DockerTag);
    assert_eq!(fixture.runner.subcommands(), vec!["--version", "build", "tag"]);
}

#[tokio::test]
async fn test_login_failure() {
    let runner = ScriptedRunner::new()
        .respond(
            "push",
            Err(CommandFailure::new(
                "docker exited with exit status: 1",
                "no basic auth credentials",
            )),
        )
        .respond(
            "login",
            Err(CommandFailure::new("docker exited with exit status: 1", "unauthorized")),
        );
    let fixture = fixture(with_authorization(existing_repository()), runner);

    let err = fixture
        .pipeline
        .build(&BuildRequest::new("base", "./"))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::DockerLogin);
    assert_eq!(
        fixture.runner.subcommands(),
        vec!["--version", "build", "tag", "push", "login"]
    );
}

#[tokio::test]
async fn test_malformed_authorization_token() {
    let ecr = existing_repository().respond(
        "getAuthorizationToken",
        Ok(json!({"authorizationData": [{"authorizationToken": "not base64!", "proxyEndpoint": PROXY_ENDPOINT}]})),
    );
    let runner = ScriptedRunner::new().respond(
        "push",
        Err(CommandFailure::new(
            "docker exited with exit status: 1",
            "no basic auth credentials",
        )),
    );
    let fixture = fixture(ecr, runner);

    let err = fixture
        .pipeline
        .build(&BuildRequest::new("base", "./"))
        .await
        .unwrap_err();

    assert_eq!(
        err.kind(),
        ErrorKind::Remote(skyhook_aws::ErrorKind::InvalidResponse)
    );
    assert!(!fixture.runner.subcommands().contains(&"login".to_string()));
}
