//! レジストリ認証処理
//!
//! ECR の認可トークンをデコードし、Bollard の DockerCredentials に変換します。

use crate::error::{BuildError, BuildResult};
use base64::Engine;
use bollard::auth::DockerCredentials;

/// ECR トークンのユーザー名
const ECR_USER: &str = "AWS";

/// ECR の認可トークンから認証情報を作成
///
/// トークンは Base64 エンコードされた `AWS:<password>`。
///
/// # Arguments
/// * `token` - GetAuthorizationToken が返す authorizationToken
/// * `server` - プロキシエンドポイントまたはレジストリホスト
pub fn ecr_credentials(token: &str, server: &str) -> BuildResult<DockerCredentials> {
    let registry = extract_registry(server);
    let auth_failed = |message: String| BuildError::AuthFailed {
        registry: registry.clone(),
        message,
    };

    let decoded = base64::engine::general_purpose::STANDARD
        .decode(token.trim())
        .map_err(|e| auth_failed(format!("Failed to decode token: {}", e)))?;
    let decoded = String::from_utf8(decoded)
        .map_err(|e| auth_failed(format!("Invalid UTF-8 in token: {}", e)))?;

    let password = decoded
        .strip_prefix(ECR_USER)
        .and_then(|rest| rest.strip_prefix(':'))
        .ok_or_else(|| auth_failed("token is not in AWS:<password> form".to_string()))?;

    Ok(DockerCredentials {
        username: Some(ECR_USER.to_string()),
        password: Some(password.to_string()),
        serveraddress: Some(registry.clone()),
        ..Default::default()
    })
}

/// URL またはイメージ名からレジストリホストを抽出
///
/// # Examples
/// - `https://123456.dkr.ecr.region.amazonaws.com` -> `123456.dkr.ecr.region.amazonaws.com`
/// - `123456.dkr.ecr.region.amazonaws.com/app:tag` -> `123456.dkr.ecr.region.amazonaws.com`
/// - `localhost:5000/app` -> `localhost:5000`
/// - `myuser/app:tag` -> `docker.io`
pub fn extract_registry(value: &str) -> String {
    let stripped = value
        .strip_prefix("https://")
        .or_else(|| value.strip_prefix("http://"))
        .unwrap_or(value);
    let mut parts = stripped.split('/');
    let first = parts.next().unwrap_or_default();
    let has_path = parts.next().is_some();

    // ホスト部分は `.` か `:` を含む。スキーム付きならパスがなくてもホスト
    if (has_path || stripped.len() != value.len()) && (first.contains('.') || first.contains(':'))
    {
        return first.to_string();
    }
    if !has_path && (first.contains('.') && !first.contains(':')) {
        return first.to_string();
    }

    "docker.io".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(s: &str) -> String {
        base64::engine::general_purpose::STANDARD.encode(s)
    }

    #[test]
    fn test_ecr_credentials() {
        let creds = ecr_credentials(
            &encode("AWS:secret-password"),
            "https://123456789.dkr.ecr.us-east-1.amazonaws.com",
        )
        .unwrap();
        assert_eq!(creds.username.as_deref(), Some("AWS"));
        assert_eq!(creds.password.as_deref(), Some("secret-password"));
        assert_eq!(
            creds.serveraddress.as_deref(),
            Some("123456789.dkr.ecr.us-east-1.amazonaws.com")
        );
    }

    #[test]
    fn test_password_may_contain_colon() {
        let creds = ecr_credentials(&encode("AWS:a:b"), "localhost:5000").unwrap();
        assert_eq!(creds.password.as_deref(), Some("a:b"));
    }

    #[test]
    fn test_invalid_token() {
        assert!(ecr_credentials("!!!", "registry.example.com").is_err());
        assert!(ecr_credentials(&encode("user:pass"), "registry.example.com").is_err());
    }

    #[test]
    fn test_extract_registry() {
        assert_eq!(
            extract_registry("https://123456.dkr.ecr.eu-west-1.amazonaws.com"),
            "123456.dkr.ecr.eu-west-1.amazonaws.com"
        );
        assert_eq!(
            extract_registry("123456.dkr.ecr.eu-west-1.amazonaws.com/app:v1"),
            "123456.dkr.ecr.eu-west-1.amazonaws.com"
        );
        assert_eq!(
            extract_registry("123456.dkr.ecr.eu-west-1.amazonaws.com"),
            "123456.dkr.ecr.eu-west-1.amazonaws.com"
        );
        assert_eq!(extract_registry("localhost:5000/myapp"), "localhost:5000");
        assert_eq!(extract_registry("myuser/app:latest"), "docker.io");
        assert_eq!(extract_registry("nginx"), "docker.io");
    }
}
