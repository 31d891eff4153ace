//! 鉴权级别分类器
//!
//! 按配置的路径模式把请求路径映射到三级鉴权要求

/// 请求路径对应的鉴权级别
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthLevel {
    /// 公开路径：不认证，也不参与限流
    None,
    /// 普通认证
    User,
    /// 管理员认证
    Admin,
}

/// 路径分类器
///
/// 模式要么精确匹配，要么以字面量 `/*` 结尾按前缀匹配；不支持正则。
#[derive(Debug, Clone)]
pub struct AuthClassifier {
    admin_paths: Vec<String>,
    public_paths: Vec<String>,
}

impl AuthClassifier {
    pub fn new(admin_paths: Vec<String>, public_paths: Vec<String>) -> Self {
        Self {
            admin_paths,
            public_paths,
        }
    }

    /// 分类规则，按此优先级：
    ///
    /// 1. 命中任一管理员模式 => Admin
    /// 2. 否则命中任一公开模式 => None
    /// 3. 否则 => User
    ///
    /// 管理员优先于公开是有意为之：同一路径被误配进两个列表时，
    /// 管理端点不会被降级成免认证。
    pub fn classify(&self, path: &str) -> AuthLevel {
        if self
            .admin_paths
            .iter()
            .any(|pattern| path_matches(path, pattern))
        {
            return AuthLevel::Admin;
        }

        if self
            .public_paths
            .iter()
            .any(|pattern| path_matches(path, pattern))
        {
            return AuthLevel::None;
        }

        AuthLevel::User
    }
}

fn path_matches(request_path: &str, pattern: &str) -> bool {
    if request_path == pattern {
        return true;
    }

    // 通配模式："/admin/*" 匹配 "/admin/users"
    if let Some(prefix) = pattern.strip_suffix("/*") {
        return request_path.starts_with(prefix);
    }

    false
}
