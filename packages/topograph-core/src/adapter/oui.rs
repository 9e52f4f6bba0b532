//! MAC OUI vendor lookup against the IEEE registry.

/// Lookup the vendor/manufacturer name for a MAC address in any common
/// format (`00:1A:2B:3C:4D:5E`, `00-1a-2b-3c-4d-5e`, `001a.2b3c.4d5e`).
pub fn lookup_vendor(mac: &str) -> Option<String> {
    let normalized = normalize_mac(mac)?;

    match oui_data::lookup(&normalized) {
        Some(record) => {
            let vendor_name = record.organization().to_string();
            tracing::debug!("OUI lookup for {}: {}", mac, vendor_name);
            Some(vendor_name)
        }
        None => {
            tracing::debug!("OUI lookup for {}: not found", mac);
            None
        }
    }
}

/// Normalize a MAC address to `XX:XX:XX:XX:XX:XX`
pub fn normalize_mac(mac: &str) -> Option<String> {
    let cleaned: String = mac.trim().replace([':', '-', '.'], "").to_uppercase();

    if cleaned.len() != 12 || !cleaned.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }

    let octets: Vec<&str> = (0..6).map(|i| &cleaned[i * 2..i * 2 + 2]).collect();
    Some(octets.join(":"))
}
