/// Integration tests for the install pipeline
///
/// Every test installs into its own temporary store. Artifacts are served
/// from `file://` URLs or a local HTTP server, and the installed program is a
/// generated shell script.
#[cfg(unix)]
mod pipeline {
    use std::fs;
    use std::path::{Path, PathBuf};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    use flate2::write::GzEncoder;
    use flate2::Compression;
    use formulary_pm::downloader::compute_digest;
    use formulary_pm::store::RECEIPT_FILE;
    use formulary_pm::{
        CancellationToken, ConfigError, DigestAlgorithm, Formula, FormulaRunner, InstallOutcome, RunError,
        RunnerConfig, Stage,
    };
    use tempfile::TempDir;
    use url::Url;

    const WORKING_SCRIPT: &[u8] = b"#!/bin/sh\necho \"macchanger Version: 1.0.0\"\n";
    const BROKEN_SCRIPT: &[u8] = b"#!/bin/sh\necho \"usage: macchanger [options]\"\n";

    struct Harness {
        temp: TempDir,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                temp: TempDir::new().unwrap(),
            }
        }

        fn store(&self) -> PathBuf {
            self.temp.path().join("store")
        }

        fn tmp(&self) -> PathBuf {
            self.temp.path().join("tmp")
        }

        fn runner(&self) -> FormulaRunner {
            FormulaRunner::new(RunnerConfig::new(self.store(), self.tmp())).unwrap()
        }

        fn install_path(&self) -> PathBuf {
            self.store().join("macchanger").join("1.0.0")
        }

        /// Publish a plain script artifact and return its URL.
        fn publish_script(&self, content: &[u8]) -> String {
            let path = self.temp.path().join("dist/macchanger.sh");
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(&path, content).unwrap();
            Url::from_file_path(&path).unwrap().to_string()
        }

        /// Publish a release tarball shaped like a GitHub tag archive.
        fn publish_tarball(&self, script: &[u8]) -> (String, Vec<u8>) {
            let path = self.temp.path().join("dist/v1.0.0.tar.gz");
            fs::create_dir_all(path.parent().unwrap()).unwrap();

            let encoder = GzEncoder::new(fs::File::create(&path).unwrap(), Compression::default());
            let mut builder = tar::Builder::new(encoder);
            for (name, data, mode) in [
                ("macchanger-1.0.0/macchanger.sh", script, 0o755),
                ("macchanger-1.0.0/README.md", b"# macchanger\n".as_slice(), 0o644),
            ] {
                let mut header = tar::Header::new_gnu();
                header.set_size(data.len() as u64);
                header.set_mode(mode);
                header.set_cksum();
                builder.append_data(&mut header, name, data).unwrap();
            }
            builder.into_inner().unwrap().finish().unwrap();

            let bytes = fs::read(&path).unwrap();
            (Url::from_file_path(&path).unwrap().to_string(), bytes)
        }

        fn assert_nothing_installed(&self) {
            assert!(!self.install_path().exists(), "install path should be absent");
            let staging = self.store().join(".staging");
            if staging.exists() {
                assert_eq!(fs::read_dir(&staging).unwrap().count(), 0, "staging should be empty");
            }
            if self.tmp().exists() {
                assert_eq!(fs::read_dir(self.tmp()).unwrap().count(), 0, "temp artifacts should be removed");
            }
        }
    }

    fn formula(url: &str, digest: &str, test_args: &str) -> Formula {
        Formula::from_json_str(&format!(
            r#"{{
                "name": "macchanger",
                "desc": "Simple macOS MAC address changer",
                "homepage": "https://github.com/willcurtis/macchanger",
                "url": "{url}",
                "sha256": "{digest}",
                "version": "1.0.0",
                "install": [{{"action": "bin", "source": "macchanger.sh", "name": "macchanger"}}],
                "test": {{"command": ["${{bin}}/macchanger", "--version"], "expect": "Version:"{test_args}}}
            }}"#
        ))
        .unwrap()
    }

    fn sha256(bytes: &[u8]) -> String {
        compute_digest(DigestAlgorithm::Sha256, bytes)
    }

    #[tokio::test]
    async fn scenario_a_matching_digest_completes() {
        let harness = Harness::new();
        let (url, bytes) = harness.publish_tarball(WORKING_SCRIPT);
        let formula = formula(&url, &sha256(&bytes), "");

        let outcome = harness.runner().run(&formula, &CancellationToken::new()).await.unwrap();

        assert!(matches!(outcome, InstallOutcome::Installed(_)));
        let record = outcome.record();
        assert_eq!(record.name, "macchanger");
        assert_eq!(record.version, "1.0.0");
        assert_eq!(record.path, harness.install_path());
        assert_eq!(record.digest, sha256(&bytes));
        assert!(harness.install_path().join("bin/macchanger").is_file());
        assert!(harness.install_path().join(RECEIPT_FILE).is_file());
    }

    #[tokio::test]
    async fn scenario_b_digest_mismatch_places_nothing() {
        let harness = Harness::new();
        let url = harness.publish_script(WORKING_SCRIPT);
        let formula = formula(&url, &"deadbeef".repeat(8), "");

        let err = harness.runner().run(&formula, &CancellationToken::new()).await.unwrap_err();

        assert_eq!(err.stage(), Stage::Verifying);
        assert_eq!(err.exit_code(), 4);
        assert!(err.to_string().starts_with("[verifying]"));
        harness.assert_nothing_installed();
        assert!(harness.runner().store().list().unwrap().is_empty());
    }

    #[test]
    fn scenario_c_placeholder_digest_is_rejected_at_load() {
        let err = Formula::from_json_str(
            r#"{
                "name": "macchanger",
                "url": "https://github.com/willcurtis/macchanger/archive/refs/tags/v1.0.0.tar.gz",
                "sha256": "<fill-in-from-github-release>",
                "version": "1.0.0",
                "install": [{"action": "bin", "source": "macchanger.sh", "name": "macchanger"}],
                "test": {"command": ["${bin}/macchanger", "--version"], "expect": "Version:"}
            }"#,
        )
        .unwrap_err();

        assert!(matches!(err, ConfigError::Digest(_)));
        assert_eq!(RunError::from(err).exit_code(), 2);
    }

    #[tokio::test]
    async fn scenario_d_failed_check_rolls_back() {
        let harness = Harness::new();
        let url = harness.publish_script(BROKEN_SCRIPT);
        let formula = formula(&url, &sha256(BROKEN_SCRIPT), "");

        let err = harness.runner().run(&formula, &CancellationToken::new()).await.unwrap_err();

        assert_eq!(err.stage(), Stage::Checking);
        assert_eq!(err.exit_code(), 6);
        assert!(err.to_string().contains("usage: macchanger"));
        harness.assert_nothing_installed();
    }

    #[tokio::test]
    async fn scenario_e_concurrent_installs_yield_one_record() {
        let harness = Harness::new();
        let url = harness.publish_script(WORKING_SCRIPT);
        let formula = formula(&url, &sha256(WORKING_SCRIPT), "");
        let runner = Arc::new(harness.runner());

        let tasks: Vec<_> = (0..2)
            .map(|_| {
                let runner = runner.clone();
                let formula = formula.clone();
                tokio::spawn(async move { runner.run(&formula, &CancellationToken::new()).await })
            })
            .collect();

        let mut fresh = 0;
        let mut records = Vec::new();
        for task in tasks {
            let outcome = task.await.unwrap().unwrap();
            if outcome.is_fresh() {
                fresh += 1;
            }
            records.push(outcome.record().clone());
        }

        assert_eq!(fresh, 1);
        assert_eq!(records[0], records[1]);
        assert_eq!(runner.store().list().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn separate_runners_on_one_store_install_once() {
        let harness = Harness::new();
        let script = b"#!/bin/sh\nsleep 1\necho \"Version: 1.0.0\"\n";
        let url = harness.publish_script(script);
        let formula = formula(&url, &sha256(script), "");

        let first = {
            let runner = harness.runner();
            let formula = formula.clone();
            tokio::spawn(async move { runner.run(&formula, &CancellationToken::new()).await })
        };

        // Start the second runner while the first is still checking.
        let binary = harness.install_path().join("bin/macchanger");
        for _ in 0..200 {
            if binary.exists() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(binary.exists());

        let second_runner = harness.runner();
        let second = second_runner.run(&formula, &CancellationToken::new()).await.unwrap();
        let first = first.await.unwrap().unwrap();

        assert!(first.is_fresh());
        assert!(matches!(second, InstallOutcome::AlreadyInstalled(_)));
        assert_eq!(first.record(), second.record());
        assert_eq!(second_runner.store().list().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn reinstall_is_idempotent() {
        let harness = Harness::new();
        let url = harness.publish_script(WORKING_SCRIPT);
        let formula = formula(&url, &sha256(WORKING_SCRIPT), "");
        let runner = harness.runner();

        let first = runner.run(&formula, &CancellationToken::new()).await.unwrap();
        // The artifact disappearing proves the second run never fetches.
        fs::remove_dir_all(harness.temp.path().join("dist")).unwrap();
        let second = runner.run(&formula, &CancellationToken::new()).await.unwrap();

        assert!(first.is_fresh());
        assert!(matches!(second, InstallOutcome::AlreadyInstalled(_)));
        assert_eq!(first.record(), second.record());
    }

    #[tokio::test]
    async fn versions_coexist() {
        let harness = Harness::new();
        let url = harness.publish_script(WORKING_SCRIPT);
        let runner = harness.runner();

        let v1 = formula(&url, &sha256(WORKING_SCRIPT), "");
        let v2_json = serde_json::to_string(&serde_json::json!({
            "name": "macchanger",
            "url": url,
            "sha256": sha256(WORKING_SCRIPT),
            "version": "1.1.0",
            "install": [{"action": "bin", "source": "macchanger.sh", "name": "macchanger"}],
            "test": {"command": ["${bin}/macchanger", "--version"], "expect": "Version:"}
        }))
        .unwrap();
        let v2 = Formula::from_json_str(&v2_json).unwrap();

        runner.run(&v1, &CancellationToken::new()).await.unwrap();
        runner.run(&v2, &CancellationToken::new()).await.unwrap();

        let versions: Vec<_> = runner
            .store()
            .versions("macchanger")
            .unwrap()
            .into_iter()
            .map(|r| r.version)
            .collect();
        assert_eq!(versions, vec!["1.0.0", "1.1.0"]);
    }

    #[tokio::test]
    async fn missing_artifact_fails_at_fetching() {
        let harness = Harness::new();
        let url = Url::from_file_path(harness.temp.path().join("dist/absent.sh")).unwrap();
        let formula = formula(url.as_str(), &sha256(WORKING_SCRIPT), "");

        let err = harness.runner().run(&formula, &CancellationToken::new()).await.unwrap_err();
        assert_eq!(err.stage(), Stage::Fetching);
        assert_eq!(err.exit_code(), 3);
        harness.assert_nothing_installed();
    }

    #[tokio::test]
    async fn cancel_during_check_leaves_no_install() {
        let harness = Harness::new();
        let script = b"#!/bin/sh\nsleep 10\necho \"Version: 1.0.0\"\n";
        let url = harness.publish_script(script);
        let formula = formula(&url, &sha256(script), "");

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        let install_path = harness.install_path();
        tokio::spawn(async move {
            // Wait until the version directory exists, i.e. the check is underway.
            for _ in 0..200 {
                if install_path.join("bin/macchanger").exists() {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(25)).await;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let err = harness.runner().run(&formula, &cancel).await.unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(err.exit_code(), 130);
        harness.assert_nothing_installed();
    }

    #[tokio::test]
    async fn cancel_during_fetch_leaves_no_install() {
        let harness = Harness::new();
        let server = tiny_http::Server::http("127.0.0.1:0").unwrap();
        let addr = server.server_addr().to_ip().unwrap();
        thread::spawn(move || {
            if let Ok(request) = server.recv() {
                thread::sleep(Duration::from_secs(3));
                let _ = request.respond(tiny_http::Response::from_data(WORKING_SCRIPT.to_vec()));
            }
        });

        let url = format!("http://{}/macchanger.sh", addr);
        let formula = formula(&url, &sha256(WORKING_SCRIPT), "");

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            trigger.cancel();
        });

        let err = harness.runner().run(&formula, &cancel).await.unwrap_err();
        assert!(matches!(err, RunError::Cancelled { stage: Stage::Fetching }));
        harness.assert_nothing_installed();
    }

    #[tokio::test]
    async fn check_timeout_from_formula_is_enforced() {
        let harness = Harness::new();
        let script = b"#!/bin/sh\nsleep 10\necho \"Version: 1.0.0\"\n";
        let url = harness.publish_script(script);
        let formula = formula(&url, &sha256(script), r#", "timeout_secs": 1"#);

        let err = harness.runner().run(&formula, &CancellationToken::new()).await.unwrap_err();
        assert_eq!(err.stage(), Stage::Checking);
        assert!(!err.is_cancelled());
        harness.assert_nothing_installed();
    }

    #[test]
    fn formula_files_load_from_disk() {
        let dir = TempDir::new().unwrap();
        let path: &Path = &dir.path().join("macchanger.toml");
        fs::write(
            path,
            r#"
name = "macchanger"
desc = "Simple macOS MAC address changer"
homepage = "https://github.com/willcurtis/macchanger"
url = "https://github.com/willcurtis/macchanger/archive/refs/tags/v1.0.0.tar.gz"
sha256 = "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
version = "1.0.0"

[[install]]
action = "bin"
source = "macchanger.sh"
name = "macchanger"

[test]
command = ["${bin}/macchanger", "--version"]
expect = "Version:"
"#,
        )
        .unwrap();

        let formula = Formula::load(path).unwrap();
        assert_eq!(formula.key(), "macchanger@1.0.0");
    }
}
