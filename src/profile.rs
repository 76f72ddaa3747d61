use std::path::Path;

use chrono::Utc;
use log::info;
use serde::Serialize;
use utoipa::ToSchema;

use crate::db::{Database, crud};
use crate::error::{KioskError, Result};

/// logo 允许的后缀
const LOGO_SUFFIXES: &[&str] = &["png", "jpg", "jpeg", "gif", "svg", "webp"];

/// 返回给前端的机构信息
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct Profile {
    pub institution_name: String,
    /// logo 的访问路径，例如 `/uploads/logo-1700000000.png`
    pub logo_url: Option<String>,
}

/// 获取最新的机构信息，没有时返回空名称
pub async fn latest(db: &Database) -> Result<Profile> {
    let profile = crud::latest_profile(db).await?;
    Ok(match profile {
        Some(record) => Profile {
            institution_name: record.institution_name,
            logo_url: record.logo_path.map(|file| format!("/uploads/{file}")),
        },
        None => Profile { institution_name: String::new(), logo_url: None },
    })
}

/// 保存机构信息
///
/// 没有上传新 logo 时沿用上一条记录的 logo
pub async fn set(
    db: &Database,
    uploads: &Path,
    institution_name: &str,
    logo: Option<(&str, &[u8])>,
) -> Result<Profile> {
    let institution_name = institution_name.trim();
    if institution_name.is_empty() {
        return Err(KioskError::validation("institution_name is required"));
    }

    let logo_path = match logo {
        Some((file_name, bytes)) => Some(save_logo(uploads, file_name, bytes).await?),
        None => crud::latest_profile(db).await?.and_then(|p| p.logo_path),
    };

    crud::add_profile(db, institution_name, logo_path.as_deref(), Utc::now()).await?;
    info!("已更新机构信息: {}", institution_name);
    latest(db).await
}

async fn save_logo(uploads: &Path, file_name: &str, bytes: &[u8]) -> Result<String> {
    let ext = Path::new(file_name)
        .extension()
        .and_then(|s| s.to_str())
        .map(|s| s.to_ascii_lowercase())
        .filter(|s| LOGO_SUFFIXES.contains(&s.as_str()))
        .ok_or_else(|| KioskError::validation(format!("unsupported logo file: {file_name}")))?;
    if bytes.is_empty() {
        return Err(KioskError::validation("logo file is empty"));
    }

    let name = format!("logo-{}.{}", Utc::now().timestamp_millis(), ext);
    tokio::fs::create_dir_all(uploads).await?;
    tokio::fs::write(uploads.join(&name), bytes).await?;
    Ok(name)
}
