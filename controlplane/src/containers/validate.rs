//! Container input validation

use std::sync::LazyLock;

use regex::Regex;

use crate::errors::PlatformError;

static NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9][a-z0-9-]*[a-z0-9]$").expect("container name pattern")
});

static IMAGE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-zA-Z0-9]([a-zA-Z0-9._/-]*[a-zA-Z0-9])?$").expect("image pattern")
});

static SUBDOMAIN_INVALID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[^a-z0-9-]").expect("subdomain pattern")
});

pub const CPU_UNITS: [u32; 5] = [256, 512, 1024, 2048, 4096];
pub const MIN_MEMORY_MB: u32 = 512;
pub const MAX_MEMORY_MB: u32 = 30720;
const MAX_IMAGE_LEN: usize = 255;

pub fn validate_name(name: &str) -> Result<(), PlatformError> {
    if (3..=63).contains(&name.len()) && NAME.is_match(name) {
        return Ok(());
    }
    Err(PlatformError::Validation(
        "Invalid container name. Use 3-63 lowercase letters, numbers and hyphens".to_string(),
    ))
}

/// Split `image[:tag]`; a colon before the last slash is a registry port
pub fn split_image(image: &str) -> (&str, Option<&str>) {
    let last_slash = image.rfind('/').map(|i| i + 1).unwrap_or(0);
    match image[last_slash..].rfind(':') {
        Some(i) => {
            let at = last_slash + i;
            (&image[..at], Some(&image[at + 1..]))
        }
        None => (image, None),
    }
}

pub fn validate_image(image: &str) -> Result<(), PlatformError> {
    let invalid = || {
        PlatformError::Validation(format!(
            "Invalid image reference {:?}. Examples: nginx, myuser/myapp, ghcr.io/org/app",
            image
        ))
    };
    let (name, tag) = split_image(image.trim());
    if name.is_empty() || name.len() > MAX_IMAGE_LEN {
        return Err(invalid());
    }
    // Registry hosts may carry a port
    let path = match name.split_once('/') {
        Some((host, rest)) if host.contains(':') => {
            let (host, port) = host.split_once(':').ok_or_else(invalid)?;
            if host.is_empty() || port.parse::<u16>().is_err() {
                return Err(invalid());
            }
            format!("{}/{}", host, rest)
        }
        _ => name.to_string(),
    };
    if !IMAGE.is_match(&path) || path.contains("//") || path.contains("..") {
        return Err(invalid());
    }
    if tag.is_some_and(|tag| tag.is_empty()) {
        return Err(invalid());
    }
    Ok(())
}

/// Subdomain derived from a container name
pub fn subdomain_for(name: &str) -> String {
    SUBDOMAIN_INVALID
        .replace_all(&name.to_lowercase(), "-")
        .into_owned()
}

/// Port an image most likely listens on
pub fn default_port_for_image(image: &str) -> u16 {
    let image = image.to_lowercase();
    let matches = |names: &[&str]| names.iter().any(|name| image.contains(name));

    if matches(&["nginx", "httpd", "apache", "caddy"]) {
        80
    } else if matches(&["node", "nextjs", "express", "nestjs"]) {
        3000
    } else if matches(&["python", "django", "flask", "fastapi", "uvicorn", "gunicorn"]) {
        8000
    } else {
        8080
    }
}

pub fn validate_cpu(cpu: u32) -> Result<(), PlatformError> {
    if CPU_UNITS.contains(&cpu) {
        return Ok(());
    }
    Err(PlatformError::Validation(format!(
        "Invalid CPU value {}. Must be one of {:?}",
        cpu, CPU_UNITS
    )))
}

pub fn validate_memory(memory: u32) -> Result<(), PlatformError> {
    if (MIN_MEMORY_MB..=MAX_MEMORY_MB).contains(&memory) {
        return Ok(());
    }
    Err(PlatformError::Validation(format!(
        "Invalid memory value {}. Must be between {} and {} MB",
        memory, MIN_MEMORY_MB, MAX_MEMORY_MB
    )))
}
