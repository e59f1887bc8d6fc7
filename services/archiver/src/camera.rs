use std::fmt;

/// Connection details for one camera, as returned by the camera directory.
#[derive(Clone, PartialEq, Eq)]
pub struct CameraRecord {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
}

impl CameraRecord {
    pub fn new(
        host: impl Into<String>,
        port: u16,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            username: username.into(),
            password: password.into(),
        }
    }

    /// Folder/prefix segment identifying this camera: `host_port`
    pub fn partition(&self) -> String {
        format!("{}_{}", self.host, self.port)
    }
}

// Keeps passwords out of logs.
impl fmt::Debug for CameraRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CameraRecord")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

impl fmt::Display for CameraRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}
