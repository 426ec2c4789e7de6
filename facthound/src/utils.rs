use std::str::FromStr;

use web3::{
    signing::{Key, SecretKey, SecretKeyRef},
    types::{Address, H256, U256},
};

use crate::error::{Error, Result};

const WEI_DECIMALS: usize = 18;

#[inline(always)]
pub fn address_of(sk: &SecretKey) -> Address {
    SecretKeyRef::new(sk).address()
}

#[inline(always)]
pub fn extract_keypair_from_str(sk_str: &str) -> Result<(SecretKey, Address)> {
    let sk_str = sk_str.trim();
    let sk_str = sk_str.strip_prefix("0x").unwrap_or(sk_str);
    let sk = SecretKey::from_str(sk_str).map_err(|e| Error::Config(format!("bad secret key: {}", e)))?;
    let addr = address_of(&sk);
    Ok((sk, addr))
}

pub fn parse_address(s: &str) -> Result<Address> {
    let s = s.trim();
    let s = s.strip_prefix("0x").unwrap_or(s);
    if s.len() != 40 {
        return Err(Error::Config(format!("bad address length: {}", s.len())));
    }
    let mut bytes = [0u8; 20];
    hex::decode_to_slice(s, &mut bytes).map_err(|e| Error::Config(format!("bad address: {}", e)))?;
    Ok(Address::from(bytes))
}

/// EIP-55 mixed-case rendering.
pub fn checksum_address(addr: &Address) -> String {
    eth_checksum::checksum(&format!("{:?}", addr))
}

/// Parses a decimal native-currency amount ("0.01") into wei.
pub fn parse_ether(amount: &str) -> Result<U256> {
    let amount = amount.trim();
    let (int, frac) = match amount.split_once('.') {
        Some((int, frac)) => (int, frac),
        None => (amount, ""),
    };
    let all_digits = |s: &str| s.bytes().all(|b| b.is_ascii_digit());
    if (int.is_empty() && frac.is_empty()) || !all_digits(int) || !all_digits(frac) {
        return Err(Error::InvalidAmount(amount.to_string()));
    }
    if frac.len() > WEI_DECIMALS {
        return Err(Error::InvalidAmount(format!(
            "{} has more than {} decimals",
            amount, WEI_DECIMALS
        )));
    }

    let digits = format!("{}{:0<width$}", int, frac, width = WEI_DECIMALS);
    let digits = digits.trim_start_matches('0');
    if digits.is_empty() {
        return Ok(U256::zero());
    }
    U256::from_dec_str(digits).map_err(|e| Error::InvalidAmount(format!("{}: {:?}", amount, e)))
}

pub fn format_ether(wei: U256) -> String {
    let unit = U256::exp10(WEI_DECIMALS);
    let int = wei / unit;
    let frac = wei % unit;
    if frac.is_zero() {
        return int.to_string();
    }
    let frac = format!("{:0>width$}", frac.to_string(), width = WEI_DECIMALS);
    format!("{}.{}", int, frac.trim_end_matches('0'))
}

pub fn explorer_tx_url(explorer: &str, tx: &H256) -> String {
    format!("{}/tx/{:?}", explorer.trim_end_matches('/'), tx)
}

#[cfg(test)]
mod tests {
    use super::*;

    // well-known anvil/hardhat account #0
    const DEV_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
    const DEV_ADDR: &str = "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266";

    #[test]
    fn keypair_from_hex_secret() {
        let (_sk, addr) = extract_keypair_from_str(DEV_KEY).unwrap();
        assert_eq!(addr, parse_address(DEV_ADDR).unwrap());
        assert_eq!(checksum_address(&addr), DEV_ADDR);
    }

    #[test]
    fn bad_secret_is_config_error() {
        assert!(matches!(extract_keypair_from_str("nope"), Err(Error::Config(_))));
    }

    #[test]
    fn parses_ether_amounts() {
        assert_eq!(parse_ether("0.01").unwrap(), U256::exp10(16));
        assert_eq!(parse_ether("1").unwrap(), U256::exp10(18));
        assert_eq!(parse_ether("1.5").unwrap(), U256::exp10(17) * 15);
        assert_eq!(parse_ether(".5").unwrap(), U256::exp10(17) * 5);
        assert_eq!(parse_ether("0").unwrap(), U256::zero());
        assert_eq!(parse_ether("0.000000000000000001").unwrap(), U256::one());
    }

    #[test]
    fn rejects_malformed_amounts() {
        for bad in ["", ".", "abc", "1.2.3", "-1", "0.0000000000000000001"] {
            assert!(parse_ether(bad).is_err(), "{:?} should be rejected", bad);
        }
    }

    #[test]
    fn formats_ether_amounts() {
        assert_eq!(format_ether(U256::exp10(16)), "0.01");
        assert_eq!(format_ether(U256::exp10(18) * 2), "2");
        assert_eq!(format_ether(U256::zero()), "0");
    }

    #[test]
    fn explorer_link_uses_full_hash() {
        let tx = H256::repeat_byte(0xab);
        let url = explorer_tx_url("https://basescan.org/", &tx);
        assert_eq!(url, format!("https://basescan.org/tx/0x{}", "ab".repeat(32)));
    }
}
