use std::path::Path;

/// `ARPHRD_CAN`, the link type sysfs reports for CAN interfaces.
const CAN_LINK_TYPE: &str = "280";

/// Names of the CAN interfaces under `root` (normally `/sys/class/net`), sorted.
pub fn list(root: &Path) -> anyhow::Result<Vec<String>> {
    let entries = match std::fs::read_dir(root) {
        Ok(v) => v,
        Err(err) => anyhow::bail!("Failed to read {}: {err}", root.display()),
    };
    let mut names = Vec::new();
    for entry in entries.flatten() {
        let link_type = std::fs::read_to_string(entry.path().join("type")).unwrap_or_default();
        if link_type.trim() == CAN_LINK_TYPE {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    names.sort();
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_can_links_are_listed() {
        let root = tempfile::tempdir().unwrap();
        for (name, link_type) in [("vcan1", "280\n"), ("eth0", "1\n"), ("can0", "280\n")] {
            std::fs::create_dir(root.path().join(name)).unwrap();
            std::fs::write(root.path().join(name).join("type"), link_type).unwrap();
        }
        std::fs::create_dir(root.path().join("lo")).unwrap();
        assert_eq!(list(root.path()).unwrap(), vec!["can0", "vcan1"]);
    }
}
