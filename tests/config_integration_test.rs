use std::fs;

use clap::Parser;
use tempfile::TempDir;

use xspec_runner::cli::Cli;
use xspec_runner::config::{ConfigManager, OutputFormatConfig};
use xspec_runner::file_discovery::FileDiscovery;
use xspec_runner::resolver::ResourceResolver;
use xspec_runner::runner::SpecRunner;

fn workspace() -> TempDir {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path();
    fs::create_dir_all(root.join("tests/skipped")).unwrap();
    fs::create_dir_all(root.join("lib")).unwrap();
    fs::write(root.join("tests/a.xspec"), "<description/>").unwrap();
    fs::write(root.join("tests/a.spec.xml"), "<description/>").unwrap();
    fs::write(root.join("tests/skipped/b.xspec"), "<description/>").unwrap();
    fs::write(root.join("lib/util.xsl"), "<xsl:stylesheet/>").unwrap();
    temp_dir
}

#[tokio::test]
async fn test_toml_configuration_drives_discovery_and_resolution() {
    let temp_dir = workspace();
    let root = temp_dir.path();
    let config_path = root.join("xspec-runner.toml");
    fs::write(
        &config_path,
        format!(
            r#"
[runner]
report_dir = "{reports}"
execution_id = "nightly"
exclude_patterns = ["**/skipped/**"]

[resolver.mappings]
"http://example.com/lib/" = "{lib}"

[engine]
xslt_command = ["saxon-he"]

[output]
format = "summary"
"#,
            reports = root.join("reports").display(),
            lib = root.join("lib").display()
        ),
    )
    .unwrap();

    let tests_dir = root.join("tests");
    let cli = Cli::try_parse_from([
        "xspec-runner",
        tests_dir.to_str().unwrap(),
        "--config",
        config_path.to_str().unwrap(),
        "--junit",
    ])
    .unwrap();

    let config = ConfigManager::load_config(&cli).await.unwrap();
    assert_eq!(config.runner.test_dir.as_deref(), Some(tests_dir.as_path()));
    assert_eq!(config.engine.xslt_command, vec!["saxon-he".to_string()]);
    assert_eq!(config.output.format, OutputFormatConfig::Summary);
    assert!(config.reports.junit);

    let files = FileDiscovery::from_config(&config.runner)
        .unwrap()
        .discover_files(&tests_dir)
        .await
        .unwrap();
    assert_eq!(files, vec![tests_dir.join("a.xspec")]);

    let runner = SpecRunner::from_config(&config).unwrap();
    let catalog = root.join("reports/nightly/catalog.xml");
    assert!(fs::read_to_string(&catalog).unwrap().contains("rewriteURI"));

    let resolved = runner
        .toolchain()
        .resolver
        .resolve("http://example.com/lib/util.xsl", None)
        .unwrap()
        .expect("mapped URI should resolve");
    assert_eq!(resolved.read_bytes().unwrap(), b"<xsl:stylesheet/>");
}

#[tokio::test]
async fn test_json_configuration_and_cli_precedence() {
    let temp_dir = workspace();
    let root = temp_dir.path();
    let config_path = root.join("xspec-runner.json");
    fs::write(
        &config_path,
        r#"{
  "runner": { "extensions": ["xml"], "execution_id": "from-file" },
  "output": { "format": "json", "verbose": true }
}"#,
    )
    .unwrap();

    let tests_dir = root.join("tests");
    let cli = Cli::try_parse_from([
        "xspec-runner",
        tests_dir.to_str().unwrap(),
        "--config",
        config_path.to_str().unwrap(),
        "--execution-id",
        "from-cli",
        "--quiet",
    ])
    .unwrap();

    let config = ConfigManager::load_config(&cli).await.unwrap();
    assert_eq!(config.runner.extensions, vec!["xml".to_string()]);
    assert_eq!(config.runner.execution_id.as_deref(), Some("from-cli"));
    assert_eq!(config.output.format, OutputFormatConfig::Json);
    assert!(config.output.quiet);
    assert!(!config.output.verbose);

    let files = FileDiscovery::from_config(&config.runner)
        .unwrap()
        .discover_files(&tests_dir)
        .await
        .unwrap();
    assert_eq!(files, vec![tests_dir.join("a.spec.xml")]);
}

#[tokio::test]
async fn test_invalid_configuration_is_rejected() {
    let temp_dir = workspace();
    let config_path = temp_dir.path().join("bad.toml");
    fs::write(&config_path, "[runner]\nexecution_id = \"a/b\"\n").unwrap();

    let cli = Cli::try_parse_from([
        "xspec-runner",
        temp_dir.path().to_str().unwrap(),
        "--config",
        config_path.to_str().unwrap(),
    ])
    .unwrap();

    let error = ConfigManager::load_config(&cli).await.unwrap_err();
    assert!(error.to_string().contains("single path segment"));
}
