//! nginx configuration generator.
//!
//! The generated file always contains the port 80 block redirecting to https. With no backends it
//! adds a default TLS listener answering 503, so nginx always has a valid configuration to start
//! with. Otherwise every distinct application gets one `upstream` block listing each address that
//! advertises it, plus one `server` block terminating TLS on the application's listen port and
//! proxying to that upstream.
use std::{
    collections::{HashMap, HashSet},
    fmt::Write,
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{event, Level};

use super::{application_map, Generator};
use crate::{
    error::{Error, Result},
    types::{Application, UpstreamApplicationMap},
};

const DEFAULT_DHPARAM_LOCATION: &str = "/etc/meshlb/dhparam.pem";
const DEFAULT_RESTART_COMMAND: &str = "sudo /bin/systemctl restart nginx";

const HTTP_REDIRECT_BLOCK: &str = r#"server {
	listen 80 default_server;
	listen [::]:80 default_server;

	server_tokens off;

	server_name _;

	return 301 https://$host$request_uri;
}"#;

const NO_BACKENDS_RESPONSE: &str = r#""<!DOCTYPE html><html><head><meta charset=\"utf-8\"><title>no backends configured</title></head><body><p>no backends configured - please try again soon</p></body></html>""#;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct NginxConfig {
    pub tls_chain_location: String,
    pub tls_key_location: String,
    pub dhparam_location: Option<String>,
    pub restart_command: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NginxGenerator {
    tls_config: String,
    restart_command: String,
}

fn render_error(err: std::fmt::Error) -> Error {
    Error::Render {
        reason: format!("unable to format nginx configuration - {}", err),
    }
}

fn is_identifier(value: &str) -> bool {
    !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
}

fn is_port(value: &str) -> bool {
    value.parse::<u16>().map(|port| port != 0).unwrap_or(false)
}

/// Rejects values that would break out of the directive they are rendered into. Such an
/// application is left out of the generated file; every other application is still rendered.
fn check_application(application: &Application) -> Result<()> {
    let invalid = |what: &str, value: &str| Error::Render {
        reason: format!(
            "application '{}' has an invalid {}: '{}'",
            application.name, what, value
        ),
    };

    if !is_identifier(&application.name) {
        return Err(invalid("name", &application.name));
    }
    if !is_port(&application.listen_port) {
        return Err(invalid("listen port", &application.listen_port));
    }
    if !is_port(&application.application_port) {
        return Err(invalid("application port", &application.application_port));
    }
    if application.protocol != "http" && application.protocol != "https" {
        return Err(invalid("protocol", &application.protocol));
    }
    // wildcard server names are allowed
    if let Some(domain) = application
        .domains
        .iter()
        .find(|d| !is_identifier(&d.replace('*', "x")))
    {
        return Err(invalid("domain", domain));
    }

    Ok(())
}

/// Assigns each application the name of its upstream block. Names are unique even when distinct
/// applications share a name, and a generated `name_N` never takes the name of another application.
fn upstream_names(applications: &[&Application]) -> Vec<String> {
    let mut totals: HashMap<&str, usize> = HashMap::new();
    for application in applications {
        *totals.entry(application.name.as_str()).or_default() += 1;
    }

    let mut taken: HashSet<String> = totals
        .iter()
        .filter(|(_, total)| **total == 1)
        .map(|(name, _)| name.to_string())
        .collect();

    let mut next_index: HashMap<&str, usize> = HashMap::new();
    applications
        .iter()
        .map(|application| {
            let name = application.name.as_str();
            if totals[name] == 1 {
                return name.to_string();
            }

            let index = next_index.entry(name).or_insert(1);
            loop {
                let candidate = format!("{}_{}", name, index);
                *index += 1;
                if taken.insert(candidate.clone()) {
                    return candidate;
                }
            }
        })
        .collect()
}

impl NginxGenerator {
    pub fn new(config: NginxConfig) -> Result<Self> {
        if config.tls_chain_location.is_empty() || config.tls_key_location.is_empty() {
            return Err(Error::Config {
                reason: "nginx generator requires 'tls-chain-location' and 'tls-key-location'"
                    .to_string(),
            });
        }

        let dhparam_location = config
            .dhparam_location
            .unwrap_or_else(|| DEFAULT_DHPARAM_LOCATION.to_string());

        Ok(Self {
            tls_config: tls_config(
                &config.tls_chain_location,
                &config.tls_key_location,
                &dhparam_location,
            ),
            restart_command: config
                .restart_command
                .unwrap_or_else(|| DEFAULT_RESTART_COMMAND.to_string()),
        })
    }

    fn default_block(&self, out: &mut String) -> std::fmt::Result {
        write!(
            out,
            "server {{
	listen 443 ssl http2 default_server;
	listen [::]:443 ssl http2 default_server;

	server_tokens off;

	server_name _;

	{tls}

	location / {{
		default_type text/html;
		return 503 {body};
	}}
}}
",
            tls = self.tls_config,
            body = NO_BACKENDS_RESPONSE
        )
    }

    fn upstream_block(
        out: &mut String,
        name: &str,
        application: &Application,
        addresses: &[String],
    ) -> std::fmt::Result {
        write!(out, "upstream {} {{", name)?;
        for address in addresses {
            write!(out, "\n\tserver {}:{};", address, application.application_port)?;
        }
        writeln!(out, "\n}}")
    }

    fn server_block(
        &self,
        out: &mut String,
        name: &str,
        application: &Application,
    ) -> std::fmt::Result {
        write!(
            out,
            "server {{
	listen {port} ssl http2;
	listen [::]:{port} ssl http2;

	proxy_http_version 1.1;

	{tls}

	server_name {domains};
	server_tokens off;

	location / {{
		proxy_pass {protocol}://{name};
	}}
}}

",
            port = application.listen_port,
            tls = self.tls_config,
            domains = application.domain_string(" "),
            protocol = application.protocol,
        )
    }
}

fn tls_config(chain: &str, key: &str, dhparam: &str) -> String {
    format!(
        r#"ssl_protocols TLSv1.2;
	ssl_prefer_server_ciphers on;
	ssl_session_timeout 1d;
	ssl_session_cache shared:SSL:50m;
	ssl_session_tickets off;

	ssl_ciphers "ECDHE-ECDSA-AES256-GCM-SHA384:ECDHE-RSA-AES256-GCM-SHA384:ECDHE-ECDSA-CHACHA20-POLY1305:ECDHE-RSA-CHACHA20-POLY1305:ECDHE-ECDSA-AES128-GCM-SHA256:ECDHE-RSA-AES128-GCM-SHA256";

	add_header X-Frame-Options "SAMEORIGIN";
	add_header X-Content-Type-Options "nosniff";
	add_header X-XSS-Protection "1; mode=block";
	add_header Referrer-Policy "no-referrer-when-downgrade";
	add_header Strict-Transport-Security "max-age=31536000; includeSubDomains; preload";
	ssl_certificate {chain};
	ssl_certificate_key {key};
	ssl_dhparam {dhparam};

	gzip on;
	gzip_disable "msie6";
	gzip_vary on;
	gzip_proxied any;
	gzip_comp_level 6;
	gzip_buffers 32 16k;
	gzip_http_version 1.1;
	gzip_min_length 250;
	gzip_types image/jpeg image/bmp image/svg+xml text/plain text/css application/json application/javascript application/x-javascript text/xml application/xml application/xml+rss text/javascript image/x-icon;
"#
    )
}

#[async_trait]
impl Generator for NginxGenerator {
    fn generate_config(&self, upstreams: &UpstreamApplicationMap) -> Result<String> {
        let mut out = String::new();
        out.push_str(HTTP_REDIRECT_BLOCK);
        out.push_str("\n\n");

        let addresses_by_application = application_map(upstreams);
        let mut applications: Vec<&Application> = addresses_by_application
            .keys()
            .filter(|application| match check_application(application) {
                Ok(()) => true,
                Err(err) => {
                    event!(Level::WARN, "skipping application: {}", err);
                    false
                }
            })
            .collect();
        if applications.is_empty() {
            self.default_block(&mut out).map_err(render_error)?;
            return Ok(out);
        }

        applications.sort();
        let names = upstream_names(&applications);

        let mut servers = String::new();
        for (application, name) in applications.iter().zip(names.iter()) {
            Self::upstream_block(
                &mut out,
                name,
                application,
                &addresses_by_application[*application],
            )
            .map_err(render_error)?;
            self.server_block(&mut servers, name, application)
                .map_err(render_error)?;
        }

        out.push('\n');
        out.push_str(&servers);
        Ok(out)
    }

    async fn handle_restart(&self) -> Result<()> {
        let output = tokio::process::Command::new("/bin/sh")
            .arg("-c")
            .arg(&self.restart_command)
            .output()
            .await
            .map_err(|e| Error::Process {
                reason: format!("unable to run '{}' - {}", self.restart_command, e),
                stdout: String::new(),
                stderr: String::new(),
            })?;

        if !output.status.success() {
            let stdout = String::from_utf8_lossy(&output.stdout).to_string();
            let stderr = String::from_utf8_lossy(&output.stderr).to_string();
            event!(
                Level::ERROR,
                "nginx restart failed:\nstdout: {}\nstderr: {}",
                stdout,
                stderr
            );
            return Err(Error::Process {
                reason: format!("'{}' exited with {}", self.restart_command, output.status),
                stdout,
                stderr,
            });
        }

        Ok(())
    }
}
