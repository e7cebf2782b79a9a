use std::path::PathBuf;
use std::time::Duration;

pub const EVALUATOR_VERSION: &str = "v1.1.3";
const DEFAULT_STARTUP_TIMEOUT: Duration = Duration::from_secs(60);

/// How to launch the rules evaluator: `java [java_args] -jar <jar> serve`.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub java_binary: String,
    pub java_args: Vec<String>,
    pub jar_path: PathBuf,
    pub download_url: String,
    pub auto_download: bool,
    pub startup_timeout: Duration,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            java_binary: "java".to_string(),
            java_args: Vec::new(),
            jar_path: default_cache_dir().join(jar_file_name()),
            download_url: format!(
                "https://storage.googleapis.com/firebase-preview-drop/emulator/{}",
                jar_file_name()
            ),
            auto_download: true,
            startup_timeout: DEFAULT_STARTUP_TIMEOUT,
        }
    }
}

impl RuntimeConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(java) = env_value("STOWAGE_RULES_JAVA") {
            config.java_binary = java;
        }
        if let Some(opts) = env_value("STOWAGE_RULES_JAVA_OPTS") {
            config.java_args = opts.split_whitespace().map(str::to_string).collect();
        }
        if let Some(jar) = env_value("STOWAGE_RULES_JAR") {
            config.jar_path = PathBuf::from(jar);
        }
        if let Some(url) = env_value("STOWAGE_RULES_DOWNLOAD_URL") {
            config.download_url = url;
        }
        if let Some(flag) = env_value("STOWAGE_RULES_AUTO_DOWNLOAD") {
            config.auto_download =
                !matches!(flag.to_ascii_lowercase().as_str(), "0" | "false" | "no");
        }
        if let Some(secs) = env_value("STOWAGE_RULES_STARTUP_TIMEOUT_SECS")
            .and_then(|value| value.parse::<u64>().ok())
        {
            config.startup_timeout = Duration::from_secs(secs);
        }

        config
    }

    pub fn command_args(&self) -> Vec<String> {
        let mut args = self.java_args.clone();
        args.push("-jar".to_string());
        args.push(self.jar_path.display().to_string());
        args.push("serve".to_string());
        args
    }

    pub fn cache_dir(&self) -> Option<PathBuf> {
        self.jar_path.parent().map(PathBuf::from)
    }
}

fn jar_file_name() -> String {
    format!("cloud-storage-rules-runtime-{EVALUATOR_VERSION}.jar")
}

fn default_cache_dir() -> PathBuf {
    let home = env_value("HOME").or_else(|| env_value("USERPROFILE"));
    match home {
        Some(home) => PathBuf::from(home).join(".cache/firebase/emulators"),
        None => std::env::temp_dir().join("firebase/emulators"),
    }
}

fn env_value(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_runs_jar_in_serve_mode() {
        let config = RuntimeConfig {
            java_args: vec!["-Xmx512m".to_string()],
            jar_path: PathBuf::from("/tmp/rules.jar"),
            ..Default::default()
        };
        assert_eq!(config.command_args(), vec!["-Xmx512m", "-jar", "/tmp/rules.jar", "serve"]);
        assert_eq!(config.cache_dir(), Some(PathBuf::from("/tmp")));
    }

    #[test]
    fn default_jar_is_versioned() {
        let config = RuntimeConfig::default();
        assert!(config.jar_path.ends_with(jar_file_name()));
        assert!(config.download_url.ends_with(&jar_file_name()));
        assert!(config.auto_download);
    }
}
