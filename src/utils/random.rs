use rand::distributions::Alphanumeric;
use rand::rngs::OsRng;
use rand::Rng;
use uuid::Uuid;

/// 默认混淆路径长度
pub const DEFAULT_PATH_LENGTH: usize = 16;

/// 生成路径的最小长度，过短的路径可被枚举
pub const MIN_PATH_LENGTH: usize = 8;

/// 生成客户端 UUID (v4, 小写带连字符)
pub fn new_client_id() -> String {
    Uuid::new_v4().to_string()
}

/// 生成随机混淆路径，例如 `/a7kRmQ2xJ9vN4pL`
///
/// 字符取自 62 个字母数字，随机源为操作系统 CSPRNG。
pub fn new_obfuscation_path(length: usize) -> String {
    let mut path = String::with_capacity(length + 1);
    path.push('/');
    path.extend(OsRng.sample_iter(&Alphanumeric).take(length).map(char::from));
    path
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_client_id_format() {
        let id = new_client_id();
        let parsed = Uuid::parse_str(&id).unwrap();
        assert_eq!(parsed.get_version_num(), 4);
        assert_eq!(id.len(), 36);
        assert_eq!(id, id.to_lowercase());
    }

    #[test]
    fn test_obfuscation_path_shape() {
        let path = new_obfuscation_path(DEFAULT_PATH_LENGTH);
        assert!(path.starts_with('/'));
        assert_eq!(path.len(), DEFAULT_PATH_LENGTH + 1);
        assert!(path[1..].chars().all(|c| c.is_ascii_alphanumeric()));

        assert_eq!(new_obfuscation_path(4).len(), 5);
        assert_eq!(new_obfuscation_path(0), "/");
    }

    #[test]
    fn test_no_collisions() {
        let paths: HashSet<_> = (0..500)
            .map(|_| new_obfuscation_path(DEFAULT_PATH_LENGTH))
            .collect();
        assert_eq!(paths.len(), 500);

        let ids: HashSet<_> = (0..500).map(|_| new_client_id()).collect();
        assert_eq!(ids.len(), 500);
    }
}
