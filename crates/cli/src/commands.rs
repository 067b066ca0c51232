//! Command implementations. The CLI stays thin: parse, consolidate, talk to
//! the bridge, print.

use std::{collections::BTreeMap, sync::Arc, time::Duration};

use secrecy::Secret;

use {
    mcport_bridge::{BridgeManager, IpcClient},
    mcport_common::{Error, Result},
    mcport_registry::{
        ProfileStore, ProxyConfig, SessionRecord, SessionRegistry, SessionStatus,
        TransportConfig, validate_session_name,
    },
    mcport_secrets::{SecretStore, SecretStoreExt},
};

use crate::output;

pub struct Ctx {
    pub registry: SessionRegistry,
    pub profiles: ProfileStore,
    pub secrets: Arc<dyn SecretStore>,
    pub manager: BridgeManager,
    pub json: bool,
}

impl Ctx {
    #[must_use]
    pub fn new(json: bool) -> Self {
        let registry = SessionRegistry::default_location();
        let profiles = ProfileStore::default_location();
        let secrets: Arc<dyn SecretStore> =
            Arc::new(mcport_secrets::KeychainSecretStore::new());
        let manager = BridgeManager::new(registry.clone(), Arc::clone(&secrets));
        Self {
            registry,
            profiles,
            secrets,
            manager,
            json,
        }
    }

    fn ipc_for(&self, record: &SessionRecord) -> IpcClient {
        let socket = BridgeManager::socket_for(record);
        // Leave headroom over the upstream per-call deadline.
        IpcClient::new(socket)
            .with_timeout(Duration::from_millis(record.options.timeout_ms + 5_000))
    }

    async fn call(
        &self,
        name: &str,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<serde_json::Value> {
        let record = self.manager.ensure_bridge_healthy(name).await?;
        self.ipc_for(&record).request(method, params).await
    }
}

/// Options collected by `mcport connect`.
pub struct ConnectOptions {
    pub name: String,
    pub url: Option<String>,
    pub command: Option<String>,
    pub args: Vec<String>,
    pub env: Vec<String>,
    pub headers: Vec<String>,
    pub profile: Option<String>,
    pub proxy_port: Option<u16>,
    pub proxy_host: String,
    pub proxy_bearer: Option<String>,
    pub timeout_ms: Option<u64>,
    pub ttl_ms: Option<u64>,
    pub refresh_buffer_sec: Option<u64>,
    pub lock_timeout_ms: Option<u64>,
}

pub async fn connect(ctx: &Ctx, opts: ConnectOptions) -> Result<()> {
    validate_session_name(&opts.name)?;
    if ctx.registry.get(&opts.name).await?.is_some() {
        return Err(Error::client(format!(
            "session '{}' already exists; `mcport close {}` first",
            opts.name, opts.name
        )));
    }

    let headers = parse_headers(&opts.headers)?;
    let transport = match (&opts.url, &opts.command) {
        (Some(url), None) => TransportConfig::Http {
            url: url.clone(),
            headers: headers.clone(),
            timeout_ms: opts.timeout_ms.unwrap_or(mcport_common::DEFAULT_TIMEOUT_MS),
        },
        (None, Some(command)) => TransportConfig::Stdio {
            command: command.clone(),
            args: opts.args.clone(),
            env: parse_env(&opts.env)?,
        },
        _ => {
            return Err(Error::client(
                "exactly one of --url or --command is required",
            ));
        },
    };

    // Header values go to the secret store only; the record is redacted.
    if !headers.is_empty() {
        ctx.secrets.set_headers(&opts.name, &headers)?;
    }

    let mut record = SessionRecord::new(&opts.name, &transport);
    if let Some(ttl) = opts.ttl_ms {
        record.options.ttl_ms = ttl;
    }
    if let Some(timeout) = opts.timeout_ms {
        record.options.timeout_ms = timeout;
    }
    if let Some(buffer) = opts.refresh_buffer_sec {
        record.options.refresh_buffer_sec = buffer;
    }
    if let Some(lock) = opts.lock_timeout_ms {
        record.options.lock_timeout_ms = lock;
    }

    if let Some(profile) = &opts.profile {
        let TransportConfig::Http { url, .. } = &transport else {
            return Err(Error::client("--profile requires an HTTP transport"));
        };
        ctx.profiles.get(url, profile).await?.ok_or_else(|| {
            Error::auth(format!("no auth profile '{profile}' for {url}; re-authenticate"))
        })?;
        record.profile_name = Some(profile.clone());
    }

    if let Some(port) = opts.proxy_port {
        record.proxy_config = Some(ProxyConfig {
            host: opts.proxy_host.clone(),
            port,
        });
        if let Some(bearer) = &opts.proxy_bearer {
            ctx.secrets
                .set_proxy_bearer(&opts.name, &Secret::new(bearer.clone()))?;
        }
    }

    ctx.registry.save(record).await?;
    let record = ctx.manager.spawn_bridge(&opts.name).await?;

    output::emit(
        ctx.json,
        &serde_json::json!({
            "session": &record.name,
            "transport": record.transport.summary(),
            "pid": record.pid,
            "protocolVersion": &record.protocol_version,
        }),
        |_| {
            println!(
                "session '{}' connected ({}), bridge pid {}",
                record.name,
                record.transport.summary(),
                record.pid.unwrap_or_default()
            );
        },
    );
    Ok(())
}

pub async fn close(ctx: &Ctx, name: &str) -> Result<()> {
    ctx.registry
        .get(name)
        .await?
        .ok_or_else(|| Error::client(format!("no such session: {name}")))?;

    ctx.manager.stop_bridge(name).await?;
    ctx.registry.delete(name).await?;
    ctx.secrets.delete_session_secrets(name)?;

    output::emit(
        ctx.json,
        &serde_json::json!({ "closed": name }),
        |_| println!("session '{name}' closed"),
    );
    Ok(())
}

pub async fn restart(ctx: &Ctx, name: &str) -> Result<()> {
    let record = ctx.manager.restart_bridge(name).await?;
    output::emit(
        ctx.json,
        &serde_json::json!({
            "session": &record.name,
            "pid": record.pid,
            "protocolVersion": &record.protocol_version,
        }),
        |_| {
            println!(
                "session '{}' restarted, bridge pid {}",
                record.name,
                record.pid.unwrap_or_default()
            );
        },
    );
    Ok(())
}

pub async fn sessions(ctx: &Ctx) -> Result<()> {
    let file = ctx.registry.load().await?;
    let records: Vec<&SessionRecord> = file.sessions.values().collect();

    if ctx.json {
        println!("{}", serde_json::to_string_pretty(&file.sessions)?);
        return Ok(());
    }

    if records.is_empty() {
        println!("no sessions");
        return Ok(());
    }
    println!(
        "{:<20} {:<9} {:<8} {:<12} {}",
        "NAME", "STATUS", "PID", "UPDATED", "TRANSPORT"
    );
    for record in records {
        let status = match record.status {
            SessionStatus::Live => "live",
            SessionStatus::Crashed => "crashed",
            SessionStatus::Expired => "expired",
        };
        println!(
            "{:<20} {:<9} {:<8} {:<12} {}",
            record.name,
            status,
            record
                .pid
                .map(|p| p.to_string())
                .unwrap_or_else(|| "-".into()),
            output::render_age(record.updated_at),
            record.transport.summary(),
        );
    }
    Ok(())
}

pub async fn status(ctx: &Ctx, name: &str) -> Result<()> {
    let record = ctx
        .registry
        .get(name)
        .await?
        .ok_or_else(|| Error::client(format!("no such session: {name}")))?;

    let mut detail = serde_json::to_value(&record)?;

    // Enrich from the live bridge when there is one; a dead bridge is not
    // an error for `status`.
    if record.pid.is_some() {
        let ipc = ctx.ipc_for(&record);
        if let Ok(version) = ipc.request("getServerVersion", None).await {
            detail["server"] = version;
        }
        if let Ok(caps) = ipc.request("getServerCapabilities", None).await {
            detail["capabilities"] = caps;
        }
        if let Ok(instructions) = ipc.request("getInstructions", None).await {
            detail["instructions"] = instructions;
        }
    }

    output::emit(ctx.json, &detail, |value| {
        println!(
            "{}",
            serde_json::to_string_pretty(value).unwrap_or_default()
        );
    });
    Ok(())
}

pub async fn clean(ctx: &Ctx) -> Result<()> {
    let report = ctx
        .registry
        .consolidate(true, Arc::clone(&ctx.secrets))
        .await?;
    output::emit(ctx.json, &serde_json::to_value(&report)?, |_| {
        println!(
            "consolidated: {} crashed, {} expired removed",
            report.crashed, report.expired
        );
    });
    Ok(())
}

pub async fn ping(ctx: &Ctx, name: &str) -> Result<()> {
    let result = ctx.call(name, "pingUpstream", None).await?;
    output::emit(ctx.json, &result, |_| println!("pong"));
    Ok(())
}

pub async fn tools_list(ctx: &Ctx, name: &str) -> Result<()> {
    let result = ctx.call(name, "listTools", None).await?;
    output::emit(ctx.json, &result, |value| {
        let empty = vec![];
        let tools = value["tools"].as_array().unwrap_or(&empty);
        for tool in tools {
            let name = tool["name"].as_str().unwrap_or("?");
            match tool["description"].as_str() {
                Some(desc) => println!("{name}  —  {desc}"),
                None => println!("{name}"),
            }
        }
        eprintln!("{} tool(s)", tools.len());
    });
    Ok(())
}

pub async fn tools_call(ctx: &Ctx, name: &str, tool: &str, args: Option<&str>) -> Result<()> {
    let arguments = parse_json_args(args)?;
    let result = ctx
        .call(
            name,
            "callTool",
            Some(serde_json::json!({ "name": tool, "arguments": arguments })),
        )
        .await?;

    output::emit(ctx.json, &result, |value| {
        let empty = vec![];
        for item in value["content"].as_array().unwrap_or(&empty) {
            match item["type"].as_str() {
                Some("text") => println!("{}", item["text"].as_str().unwrap_or_default()),
                Some(kind) => println!("[{kind} content]"),
                None => {},
            }
        }
        if value["isError"].as_bool().unwrap_or(false) {
            eprintln!("tool reported an error");
        }
    });
    Ok(())
}

pub async fn resources_list(ctx: &Ctx, name: &str, templates: bool) -> Result<()> {
    let method = if templates {
        "listResourceTemplates"
    } else {
        "listResources"
    };
    let result = ctx.call(name, method, None).await?;
    output::emit(ctx.json, &result, |value| {
        let key = if templates {
            "resourceTemplates"
        } else {
            "resources"
        };
        let empty = vec![];
        for item in value[key].as_array().unwrap_or(&empty) {
            let uri = item["uri"]
                .as_str()
                .or_else(|| item["uriTemplate"].as_str())
                .unwrap_or("?");
            match item["name"].as_str() {
                Some(n) => println!("{uri}  ({n})"),
                None => println!("{uri}"),
            }
        }
    });
    Ok(())
}

pub async fn resources_read(ctx: &Ctx, name: &str, uri: &str) -> Result<()> {
    let result = ctx
        .call(name, "readResource", Some(serde_json::json!({ "uri": uri })))
        .await?;
    output::emit(ctx.json, &result, |value| {
        let empty = vec![];
        for content in value["contents"].as_array().unwrap_or(&empty) {
            match content["text"].as_str() {
                Some(text) => println!("{text}"),
                None => println!(
                    "{}",
                    serde_json::to_string_pretty(content).unwrap_or_default()
                ),
            }
        }
    });
    Ok(())
}

pub async fn resources_subscribe(ctx: &Ctx, name: &str, uri: &str, on: bool) -> Result<()> {
    let method = if on {
        "subscribeResource"
    } else {
        "unsubscribeResource"
    };
    let result = ctx
        .call(name, method, Some(serde_json::json!({ "uri": uri })))
        .await?;
    output::emit(ctx.json, &result, |_| {
        println!(
            "{} {}",
            if on { "subscribed to" } else { "unsubscribed from" },
            uri
        );
    });
    Ok(())
}

pub async fn prompts_list(ctx: &Ctx, name: &str) -> Result<()> {
    let result = ctx.call(name, "listPrompts", None).await?;
    output::emit(ctx.json, &result, |value| {
        let empty = vec![];
        for prompt in value["prompts"].as_array().unwrap_or(&empty) {
            let name = prompt["name"].as_str().unwrap_or("?");
            match prompt["description"].as_str() {
                Some(desc) => println!("{name}  —  {desc}"),
                None => println!("{name}"),
            }
        }
    });
    Ok(())
}

pub async fn prompts_get(ctx: &Ctx, name: &str, prompt: &str, args: Option<&str>) -> Result<()> {
    let mut params = serde_json::json!({ "name": prompt });
    if args.is_some() {
        params["arguments"] = parse_json_args(args)?;
    }
    let result = ctx.call(name, "getPrompt", Some(params)).await?;
    output::emit(ctx.json, &result, |value| {
        println!(
            "{}",
            serde_json::to_string_pretty(value).unwrap_or_default()
        );
    });
    Ok(())
}

pub async fn log_level(ctx: &Ctx, name: &str, level: &str) -> Result<()> {
    let result = ctx
        .call(
            name,
            "setLoggingLevel",
            Some(serde_json::json!({ "level": level })),
        )
        .await?;
    output::emit(ctx.json, &result, |_| {
        println!("server log level set to {level}");
    });
    Ok(())
}

pub async fn auth_list(ctx: &Ctx) -> Result<()> {
    let profiles = ctx.profiles.list().await?;
    if ctx.json {
        println!("{}", serde_json::to_string_pretty(&profiles)?);
        return Ok(());
    }
    if profiles.is_empty() {
        println!("no auth profiles");
        return Ok(());
    }
    for profile in profiles {
        println!(
            "{:<16} {:<40} expires {}",
            profile.name,
            profile.server_url,
            profile
                .expires_at
                .map(output::render_eta)
                .unwrap_or_else(|| "never".into()),
        );
    }
    Ok(())
}

pub async fn auth_show(ctx: &Ctx, server_url: &str, name: &str) -> Result<()> {
    let profile = ctx.profiles.get(server_url, name).await?.ok_or_else(|| {
        Error::client(format!("no auth profile '{name}' for {server_url}"))
    })?;
    output::emit(ctx.json, &serde_json::to_value(&profile)?, |value| {
        println!(
            "{}",
            serde_json::to_string_pretty(value).unwrap_or_default()
        );
    });
    Ok(())
}

// ── Parsing helpers ─────────────────────────────────────────────────────────

fn parse_headers(raw: &[String]) -> Result<BTreeMap<String, String>> {
    let mut headers = BTreeMap::new();
    for entry in raw {
        let (name, value) = entry.split_once(':').ok_or_else(|| {
            Error::client(format!("malformed --header '{entry}': expected 'Name: value'"))
        })?;
        headers.insert(name.trim().to_string(), value.trim().to_string());
    }
    Ok(headers)
}

fn parse_env(raw: &[String]) -> Result<BTreeMap<String, String>> {
    let mut env = BTreeMap::new();
    for entry in raw {
        let (key, value) = entry.split_once('=').ok_or_else(|| {
            Error::client(format!("malformed --env '{entry}': expected 'KEY=VALUE'"))
        })?;
        env.insert(key.to_string(), value.to_string());
    }
    Ok(env)
}

fn parse_json_args(args: Option<&str>) -> Result<serde_json::Value> {
    match args {
        None => Ok(serde_json::json!({})),
        Some(raw) => {
            let value: serde_json::Value = serde_json::from_str(raw)
                .map_err(|e| Error::client(format!("--args is not valid JSON: {e}")))?;
            if !value.is_object() {
                return Err(Error::client("--args must be a JSON object"));
            }
            Ok(value)
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn headers_parse_and_trim() {
        let parsed =
            parse_headers(&["X-Api-Key: secret".into(), "Accept:application/json".into()])
                .unwrap();
        assert_eq!(parsed["X-Api-Key"], "secret");
        assert_eq!(parsed["Accept"], "application/json");
    }

    #[test]
    fn malformed_header_is_client_error() {
        let err = parse_headers(&["no-colon-here".into()]).unwrap_err();
        assert_eq!(err.exit_code(), 1);
    }

    #[test]
    fn env_pairs_parse() {
        let parsed = parse_env(&["DEBUG=1".into(), "PATH=/usr/bin:/bin".into()]).unwrap();
        assert_eq!(parsed["DEBUG"], "1");
        assert_eq!(parsed["PATH"], "/usr/bin:/bin");
    }

    #[test]
    fn json_args_default_to_empty_object() {
        assert_eq!(parse_json_args(None).unwrap(), serde_json::json!({}));
    }

    #[test]
    fn json_args_reject_non_objects() {
        assert!(parse_json_args(Some("[1,2]")).is_err());
        assert!(parse_json_args(Some("not json")).is_err());
        assert!(parse_json_args(Some(r#"{"a": 1}"#)).is_ok());
    }
}
