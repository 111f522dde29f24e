//! Per-profile compose artifacts: `compose.yaml` and its `.env`.

use std::collections::BTreeMap;

use crate::error::Result;
use crate::paths::{write_atomic, DataPaths};
use crate::profile::secrets::{
    normalize_encryption_key, random_key_32, random_token, ENC_KEY, JWT_SECRET_KEY,
    MIN_JWT_SECRET_LEN, SECRET_FILE_MODE,
};
use crate::profile::types::{Profile, DEFAULT_HOST_PORT};

const COMPOSE_FILE_MODE: u32 = 0o644;

const DEFAULT_MEMORY_LIMIT: &str = "4024M";
const DEFAULT_CPU_LIMIT: f64 = 1.0;

/// Stack definition shared by every profile. Values come from `.env`.
pub const COMPOSE_TEMPLATE: &str = r#"services:
  kimmio_app:
    image: ${KIMMIO_APP_IMAGE}
    restart: always
    depends_on:
      - postgres
      - redis
      - minio
    environment:
      JWT_SECRET: ${JWT_SECRET}
      ENC_KEY_V0: ${ENC_KEY_V0}
      INSTANCE_ID: ${INSTANCE_ID}
      PORT: ${APP_PORT}
      DOMAIN: ${APP_DOMAIN}
      WEBSOCKET_PORT: ${WEBSOCKET_PORT}
      MINIO_ROOT_USER: ${MINIO_ROOT_USER}
      MINIO_ROOT_PASSWORD: ${MINIO_ROOT_PASSWORD}
      MINIO_ROOT_HOST: ${MINIO_ROOT_HOST}
      MINIO_ROOT_PORT: ${MINIO_ROOT_PORT}
      REDIS_PASSWORD: ${REDIS_PASSWORD}
      REDIS_PORT: ${REDIS_PORT}
      REDIS_HOST: ${REDIS_HOST}
      POSTGRES_HOST: ${POSTGRES_HOST}
      POSTGRES_PORT: ${POSTGRES_PORT}
      POSTGRES_USER: ${POSTGRES_USER}
      POSTGRES_PASSWORD: ${POSTGRES_PASSWORD}
      POSTGRES_DB: ${POSTGRES_DB}
    ports:
      - "${APP_PORT}:${APP_PORT}"
    networks:
      - public
      - internal
    volumes:
      - kimmio_data:/app/.data
      - kimmio_run:/app/.run
    healthcheck:
      test: [ "CMD", "wget", "-qO-", "http://localhost:$${APP_PORT}/health" ]
      interval: 30s
      timeout: 5s
      retries: 5
    deploy:
      resources:
        limits:
          cpus: "${CPU_LIMIT}"
          memory: ${MEMORY_LIMIT}
        reservations:
          cpus: "0.25"
          memory: 256M

  postgres:
    image: pgvector/pgvector:pg16
    restart: always
    environment:
      POSTGRES_USER: ${POSTGRES_USER}
      POSTGRES_PASSWORD: ${POSTGRES_PASSWORD}
      POSTGRES_DB: ${POSTGRES_DB}
    networks:
      - internal
    volumes:
      - postgres_data:/var/lib/postgresql/data
    healthcheck:
      test: [ "CMD-SHELL", "pg_isready -U $${POSTGRES_USER}" ]
      interval: 10s
      timeout: 5s
      retries: 5

  redis:
    image: redis:7.2
    restart: always
    command: >
      redis-server
      --appendonly yes
      --requirepass ${REDIS_PASSWORD}
    networks:
      - internal
    volumes:
      - redis_data:/data
    healthcheck:
      test: [ "CMD", "redis-cli", "-a", "${REDIS_PASSWORD}", "ping" ]
      interval: 10s
      timeout: 3s
      retries: 5

  minio:
    image: minio/minio:RELEASE.2024-01-31T20-20-33Z
    restart: always
    command: server /data --console-address ":9001"
    environment:
      MINIO_ROOT_USER: ${MINIO_ROOT_USER}
      MINIO_ROOT_PASSWORD: ${MINIO_ROOT_PASSWORD}
    networks:
      - internal
    volumes:
      - minio_data:/data
    healthcheck:
      test: [ "CMD", "curl", "-f", "http://localhost:9000/minio/health/live" ]
      interval: 30s
      timeout: 5s
      retries: 5

networks:
  public:
    driver: bridge
  internal:
    driver: bridge
    internal: true

volumes:
  postgres_data:
    name: ${INSTANCE_ID}_postgres_data
  redis_data:
    name: ${INSTANCE_ID}_redis_data
  kimmio_data:
    name: ${INSTANCE_ID}_kimmio_data
  kimmio_run:
    name: ${INSTANCE_ID}_kimmio_run
  minio_data:
    name: ${INSTANCE_ID}_minio_data
"#;

/// Compose project name: `kimmio-` plus the id with anything outside
/// `[a-z0-9]` replaced by `-`.
pub fn project_name(profile_id: &str) -> String {
    let clean: String = profile_id
        .to_lowercase()
        .chars()
        .map(|c| {
            if c.is_ascii_lowercase() || c.is_ascii_digit() {
                c
            } else {
                '-'
            }
        })
        .collect();
    format!("kimmio-{}", clean.trim_matches('-'))
}

/// Image reference for a version; an empty version means `latest`.
pub fn image_ref(repository: &str, version: &str) -> String {
    let version = version.trim();
    let tag = if version.is_empty() { "latest" } else { version };
    format!("{}:{}", repository, tag)
}

/// Make sure the stored secrets are usable. Returns the repaired set and
/// whether anything had to be regenerated.
pub fn heal_secrets(
    profile_id: &str,
    mut secrets: BTreeMap<String, String>,
) -> (BTreeMap<String, String>, bool) {
    let mut healed = false;

    let jwt = secrets
        .get(JWT_SECRET_KEY)
        .map(|v| v.trim().to_string())
        .unwrap_or_default();
    if jwt.len() < MIN_JWT_SECRET_LEN {
        if !jwt.is_empty() {
            log::warn!(
                "JWT_SECRET for {} is too short ({} chars), regenerating",
                profile_id,
                jwt.len()
            );
        }
        secrets.insert(JWT_SECRET_KEY.to_string(), random_token(48));
        healed = true;
    }

    let raw_key = secrets.get(ENC_KEY).cloned().unwrap_or_default();
    match normalize_encryption_key(&raw_key) {
        Some(key) => {
            if key != raw_key {
                healed = true;
            }
            secrets.insert(ENC_KEY.to_string(), key);
        }
        None => {
            if !raw_key.trim().is_empty() {
                log::warn!("{} for {} is invalid, regenerating", ENC_KEY, profile_id);
            }
            secrets.insert(ENC_KEY.to_string(), random_key_32());
            healed = true;
        }
    }

    (secrets, healed)
}

/// Variables for the compose `.env`, in file order. Profile env values
/// override derived defaults; `secrets` must already be healed.
pub fn compose_env(
    profile: &Profile,
    secrets: &BTreeMap<String, String>,
    image_repository: &str,
) -> Vec<(&'static str, String)> {
    let id = profile.id.as_str();
    let host_port = match profile.host_port() {
        0 => DEFAULT_HOST_PORT,
        port => port,
    };
    let memory = match profile.resources.limits.memory.trim() {
        "" => DEFAULT_MEMORY_LIMIT.to_string(),
        memory => memory.to_string(),
    };
    let cpus = if profile.resources.limits.cpus > 0.0 {
        profile.resources.limits.cpus
    } else {
        DEFAULT_CPU_LIMIT
    };
    let base = id.replace('-', "_");

    let value = |key: &str, fallback: String| -> String {
        profile
            .env
            .get(key)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
            .map(str::to_string)
            .unwrap_or(fallback)
    };
    let secret = |key: &str| secrets.get(key).cloned().unwrap_or_default();

    vec![
        ("JWT_SECRET", secret(JWT_SECRET_KEY)),
        ("ENC_KEY_V0", secret(ENC_KEY)),
        ("INSTANCE_ID", value("INSTANCE_ID", id.to_string())),
        ("APP_PORT", value("APP_PORT", host_port.to_string())),
        ("APP_DOMAIN", value("APP_DOMAIN", "localhost".to_string())),
        ("WEBSOCKET_PORT", value("WEBSOCKET_PORT", host_port.to_string())),
        (
            "KIMMIO_APP_IMAGE",
            image_ref(image_repository, &profile.version),
        ),
        ("POSTGRES_USER", value("POSTGRES_USER", "postgres".to_string())),
        (
            "POSTGRES_PASSWORD",
            value("POSTGRES_PASSWORD", "postgres".to_string()),
        ),
        ("POSTGRES_HOST", value("POSTGRES_HOST", "postgres".to_string())),
        ("POSTGRES_DB", value("POSTGRES_DB", id.to_string())),
        ("POSTGRES_PORT", value("POSTGRES_PORT", "5432".to_string())),
        ("REDIS_HOST", value("REDIS_HOST", "redis".to_string())),
        ("REDIS_PORT", value("REDIS_PORT", "6379".to_string())),
        (
            "REDIS_PASSWORD",
            value("REDIS_PASSWORD", format!("{}_redis_pw", id)),
        ),
        (
            "MINIO_ROOT_USER",
            value("MINIO_ROOT_USER", format!("minio_{}", base)),
        ),
        (
            "MINIO_ROOT_PASSWORD",
            value("MINIO_ROOT_PASSWORD", format!("{}_minio_pw", id)),
        ),
        ("MINIO_ROOT_HOST", value("MINIO_ROOT_HOST", "minio".to_string())),
        ("MINIO_ROOT_PORT", value("MINIO_ROOT_PORT", "9000".to_string())),
        ("MEMORY_LIMIT", memory),
        ("CPU_LIMIT", format!("{:.2}", cpus)),
    ]
}

pub fn render_env(vars: &[(&str, String)]) -> String {
    vars.iter()
        .map(|(k, v)| format!("{}={}\n", k, v))
        .collect()
}

/// Write `compose.yaml` and `.env` into the profile's compose directory.
/// `.env` carries secrets and is owner-only.
pub fn write_artifacts(paths: &DataPaths, profile_id: &str, env: &str) -> Result<()> {
    write_atomic(
        &paths.compose_file(profile_id),
        COMPOSE_TEMPLATE.as_bytes(),
        COMPOSE_FILE_MODE,
    )?;
    write_atomic(
        &paths.compose_env_file(profile_id),
        env.as_bytes(),
        SECRET_FILE_MODE,
    )
}
