//! Capability checks that turn a missing feature into a test skip.

use crate::ctrl::Device;
use crate::error::{HarnessError, Result};
use crate::util::parse_int_auto;

const CAPA_FLAG_EXT_KEY_ID: i128 = 0x8000000000000000;
const CAPA_FLAG_CSA: i128 = 0x80000000;

fn has_token(capa: &Option<Vec<String>>, token: &str) -> bool {
    capa.as_ref()
        .is_some_and(|tokens| tokens.iter().any(|t| t == token))
}

fn require_token<D: Device + ?Sized>(dev: &D, field: &str, token: &str, reason: &str) -> Result<()> {
    if !has_token(&dev.get_capability(field)?, token) {
        return Err(HarnessError::skip(reason));
    }
    Ok(())
}

/// Skip unless the `VM` environment variable equals `VM`.
pub fn require_under_vm() -> Result<()> {
    check_vm_marker(std::env::var("VM").ok().as_deref())
}

pub fn check_vm_marker(value: Option<&str>) -> Result<()> {
    if value != Some("VM") {
        return Err(HarnessError::skip("Not running under VM"));
    }
    Ok(())
}

pub const FIPS_REASON: &str = "Not supported in FIPS mode";

/// Skip when the daemon was built in FIPS mode.
pub fn skip_with_fips<D: Device + ?Sized>(dev: &D, reason: &str) -> Result<()> {
    if has_token(&dev.get_capability("fips")?, "FIPS") {
        return Err(HarnessError::skip(reason));
    }
    Ok(())
}

fn driver_capa_flags<D: Device + ?Sized>(dev: &D) -> Result<i128> {
    let raw = dev
        .get_driver_status_field("capa.flags")?
        .ok_or_else(|| HarnessError::failure("driver status has no capa.flags"))?;
    parse_int_auto(&raw).map_err(|e| HarnessError::failure(format!("capa.flags: {e}")))
}

pub fn check_ext_key_id_capa<D: Device + ?Sized>(dev: &D) -> Result<()> {
    if driver_capa_flags(dev)? & CAPA_FLAG_EXT_KEY_ID == 0 {
        return Err(HarnessError::skip("Extended Key ID not supported"));
    }
    Ok(())
}

/// Skip unless the driver can do channel switch announcements.
pub fn csa_supported<D: Device + ?Sized>(dev: &D) -> Result<()> {
    if driver_capa_flags(dev)? & CAPA_FLAG_CSA == 0 {
        return Err(HarnessError::skip("CSA not supported"));
    }
    Ok(())
}

pub fn skip_without_tkip<D: Device + ?Sized>(dev: &D) -> Result<()> {
    if !has_token(&dev.get_capability("pairwise")?, "TKIP")
        || !has_token(&dev.get_capability("group")?, "TKIP")
    {
        return Err(HarnessError::skip("Cipher TKIP not supported"));
    }
    Ok(())
}

pub fn check_wep_capa<D: Device + ?Sized>(dev: &D) -> Result<()> {
    require_token(dev, "group", "WEP40", "WEP not supported")
}

pub fn check_sae_capab<D: Device + ?Sized>(dev: &D) -> Result<()> {
    require_token(dev, "auth_alg", "SAE", "SAE not supported")
}

pub fn check_sae_pk_capab<D: Device + ?Sized>(dev: &D) -> Result<()> {
    require_token(dev, "sae", "PK", "SAE-PK not supported")
}

pub fn check_owe_capab<D: Device + ?Sized>(dev: &D) -> Result<()> {
    require_token(dev, "key_mgmt", "OWE", "OWE not supported")
}

pub fn check_erp_capa<D: Device + ?Sized>(dev: &D) -> Result<()> {
    require_token(dev, "erp", "ERP", "ERP not supported in the build")
}

pub fn check_fils_capa<D: Device + ?Sized>(dev: &D) -> Result<()> {
    require_token(dev, "fils", "FILS", "FILS not supported")
}

pub fn check_fils_sk_pfs_capa<D: Device + ?Sized>(dev: &D) -> Result<()> {
    require_token(dev, "fils", "FILS-SK-PFS", "FILS-SK-PFS not supported")
}

fn tls_library<D: Device + ?Sized>(dev: &D) -> Result<String> {
    Ok(dev.request("GET tls_library")?.trim().to_string())
}

pub fn check_imsi_privacy_support<D: Device + ?Sized>(dev: &D) -> Result<()> {
    let tls = tls_library(dev)?;
    if tls.starts_with("OpenSSL") {
        return Ok(());
    }
    Err(HarnessError::skip(format!(
        "IMSI privacy not supported with this TLS library: {tls}"
    )))
}

pub fn check_tls_tod<D: Device + ?Sized>(dev: &D) -> Result<()> {
    let tls = tls_library(dev)?;
    if ["OpenSSL", "wolfSSL", "internal"]
        .iter()
        .any(|lib| tls.starts_with(lib))
    {
        return Ok(());
    }
    Err(HarnessError::skip(format!(
        "TLS TOD-TOFU/STRICT not supported with this TLS library: {tls}"
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedDevice;

    fn skip_reason(res: Result<()>) -> String {
        res.unwrap_err().skip_reason().unwrap().to_string()
    }

    #[test]
    fn vm_marker() {
        assert!(check_vm_marker(Some("VM")).is_ok());
        assert_eq!(skip_reason(check_vm_marker(None)), "Not running under VM");
        assert_eq!(skip_reason(check_vm_marker(Some("vm"))), "Not running under VM");
    }

    #[test]
    fn fips_mode_skips() {
        let fips = ScriptedDevice::new("wlan0").reply("GET_CAPABILITY fips", "FIPS");
        assert_eq!(skip_reason(skip_with_fips(&fips, FIPS_REASON)), FIPS_REASON);

        let plain = ScriptedDevice::new("wlan0").reply("GET_CAPABILITY fips", "FAIL");
        assert!(skip_with_fips(&plain, FIPS_REASON).is_ok());
    }

    #[test]
    fn tkip_needs_both_cipher_lists() {
        let dev = ScriptedDevice::new("wlan0")
            .reply("GET_CAPABILITY pairwise", "CCMP TKIP NONE")
            .reply("GET_CAPABILITY group", "CCMP");
        assert_eq!(skip_reason(skip_without_tkip(&dev)), "Cipher TKIP not supported");

        let dev = ScriptedDevice::new("wlan0")
            .reply("GET_CAPABILITY pairwise", "CCMP TKIP NONE")
            .reply("GET_CAPABILITY group", "CCMP TKIP WEP104 WEP40");
        assert!(skip_without_tkip(&dev).is_ok());
        assert!(check_wep_capa(&dev).is_ok());
    }

    #[test]
    fn token_checks_match_whole_tokens() {
        let dev = ScriptedDevice::new("wlan0")
            .reply("GET_CAPABILITY fils", "FILS")
            .reply("GET_CAPABILITY sae", "H2E")
            .reply("GET_CAPABILITY key_mgmt", "NONE WPA-PSK OWE")
            .reply("GET_CAPABILITY erp", "FAIL");
        assert!(check_fils_capa(&dev).is_ok());
        assert_eq!(
            skip_reason(check_fils_sk_pfs_capa(&dev)),
            "FILS-SK-PFS not supported"
        );
        assert_eq!(skip_reason(check_sae_pk_capab(&dev)), "SAE-PK not supported");
        assert!(check_owe_capab(&dev).is_ok());
        assert_eq!(skip_reason(check_erp_capa(&dev)), "ERP not supported in the build");
        assert_eq!(skip_reason(check_sae_capab(&dev)), "SAE not supported");
    }

    #[test]
    fn driver_flag_checks() {
        let dev = ScriptedDevice::new("wlan0")
            .reply("STATUS-DRIVER", "capa.flags=0x8000000080000000\n");
        assert!(check_ext_key_id_capa(&dev).is_ok());
        assert!(csa_supported(&dev).is_ok());

        let dev = ScriptedDevice::new("wlan0").reply("STATUS-DRIVER", "capa.flags=0x1\n");
        assert_eq!(
            skip_reason(check_ext_key_id_capa(&dev)),
            "Extended Key ID not supported"
        );
        assert_eq!(skip_reason(csa_supported(&dev)), "CSA not supported");
    }

    #[test]
    fn missing_capa_flags_is_a_failure() {
        let dev = ScriptedDevice::new("wlan0").reply("STATUS-DRIVER", "country=00\n");
        let err = check_ext_key_id_capa(&dev).unwrap_err();
        assert!(!err.is_skip());
    }

    #[test]
    fn tls_library_checks() {
        let openssl = ScriptedDevice::new("wlan0").reply("GET tls_library", "OpenSSL 3.0.2");
        assert!(check_imsi_privacy_support(&openssl).is_ok());
        assert!(check_tls_tod(&openssl).is_ok());

        let internal = ScriptedDevice::new("wlan0").reply("GET tls_library", "internal");
        assert_eq!(
            skip_reason(check_imsi_privacy_support(&internal)),
            "IMSI privacy not supported with this TLS library: internal"
        );
        assert!(check_tls_tod(&internal).is_ok());

        let gnutls = ScriptedDevice::new("wlan0").reply("GET tls_library", "GnuTLS");
        assert!(check_tls_tod(&gnutls).unwrap_err().is_skip());
    }
}
