//! One-shot project scaffolding

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::config::Settings;
use crate::errors::DeployError;

const NGINX_VHOST: &str = r#"upstream app_server {
  server unix:/tmp/app.sock fail_timeout=0;
}

server {
  listen 80;
  server_name staging.example.com;
  root /home/app/app/current/public;

  location / {
    proxy_set_header X-Forwarded-For $proxy_add_x_forwarded_for;
    proxy_set_header Host $http_host;
    proxy_redirect off;
    try_files $uri @app;
  }

  location @app {
    proxy_pass http://app_server;
  }
}
"#;

const PROCFILE: &str = r#"web: bundle exec puma -C config/puma.rb
worker: bundle exec script/delayed_job run
"#;

const RUBY_VERSION: &str = "3.3.0\n";

const PREINITIALIZER: &str = r#"# Loads config/app.yml into APP_CONFIG before the framework boots.
require 'yaml'

config_file = File.expand_path('../app.yml', __FILE__)
APP_CONFIG = YAML.load_file(config_file).freeze
"#;

const APP_CONFIG: &str = r#"defaults: &defaults
  host: localhost

development:
  <<: *defaults

staging:
  <<: *defaults

qa:
  <<: *defaults

production:
  <<: *defaults
"#;

const SECRETS_SAMPLE: &str = r#"# Copy to secrets.yml and fill in per environment. Never commit the copy.
defaults: &defaults
  database_password: ''
  secret_token: ''

staging:
  <<: *defaults

qa:
  <<: *defaults

production:
  <<: *defaults
"#;

/// Writes initial deployment configuration into a new project directory.
/// Invoked at most once per project; existing files are left untouched.
pub struct ConfigGenerator;

impl ConfigGenerator {
    /// Write the template set under `target`, returning the paths created
    pub fn scaffold(target: &Path) -> Result<Vec<PathBuf>, DeployError> {
        let settings_sample = serde_json::to_string_pretty(&Settings::default())?;

        let files: &[(&str, &str)] = &[
            ("deckhand.json", settings_sample.as_str()),
            ("config/nginx.staging.conf", NGINX_VHOST),
            ("Procfile", PROCFILE),
            (".ruby-version", RUBY_VERSION),
            ("config/preinitializer.rb", PREINITIALIZER),
            ("config/app.yml", APP_CONFIG),
            ("config/secrets.yml.sample", SECRETS_SAMPLE),
        ];

        let mut written = Vec::new();
        for (relative, contents) in files {
            let path = target.join(relative);
            if path.exists() {
                warn!("Skipping existing file {}", path.display());
                continue;
            }
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(&path, contents)?;
            info!("Wrote {}", path.display());
            written.push(path);
        }

        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scaffold_writes_template_set() {
        let dir = tempfile::tempdir().unwrap();
        let written = ConfigGenerator::scaffold(dir.path()).unwrap();

        assert_eq!(written.len(), 7);
        assert!(dir.path().join("config/preinitializer.rb").exists());

        let settings = fs::read_to_string(dir.path().join("deckhand.json")).unwrap();
        let parsed: Settings = serde_json::from_str(&settings).unwrap();
        assert_eq!(parsed.remote_name, "origin");
    }

    #[test]
    fn test_scaffold_never_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("Procfile"), "web: custom\n").unwrap();

        let written = ConfigGenerator::scaffold(dir.path()).unwrap();
        assert!(written.iter().all(|p| !p.ends_with("Procfile")));
        assert_eq!(
            fs::read_to_string(dir.path().join("Procfile")).unwrap(),
            "web: custom\n"
        );
    }
}
