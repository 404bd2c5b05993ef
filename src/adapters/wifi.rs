//! WiFi station-mode adapter.
//!
//! Brings the station interface up so the HTTP server can accept update
//! clients. Credentials are baked in at build time from the
//! `OTALINK_WIFI_SSID` / `OTALINK_WIFI_PASS` environment variables and
//! validated before use.
//!
//! ## cfg gating
//!
//! - **`target_os = "espidf"`**: `esp_idf_svc::wifi::BlockingWifi` driver.
//! - **all other targets**: only credential handling is compiled.

use core::fmt;

#[cfg(target_os = "espidf")]
use log::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectivityError {
    NoCredentials,
    InvalidSsid,
    InvalidPassword,
    /// Driver setup failed (native error code).
    Driver(i32),
    /// Every connect attempt failed.
    ConnectionFailed { attempts: u8 },
}

impl fmt::Display for ConnectivityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoCredentials => write!(f, "no WiFi credentials configured"),
            Self::InvalidSsid => write!(f, "SSID invalid (must be 1-32 printable ASCII bytes)"),
            Self::InvalidPassword => write!(
                f,
                "password invalid (must be 8-64 bytes for WPA2, or empty for open)"
            ),
            Self::Driver(code) => write!(f, "WiFi driver error ({code})"),
            Self::ConnectionFailed { attempts } => {
                write!(f, "WiFi connection failed after {attempts} attempts")
            }
        }
    }
}

impl std::error::Error for ConnectivityError {}

// ───────────────────────────────────────────────────────────────
// Credentials
// ───────────────────────────────────────────────────────────────

fn is_printable_ascii(s: &str) -> bool {
    s.bytes().all(|b| (0x20..=0x7E).contains(&b))
}

fn validate_ssid(ssid: &str) -> Result<(), ConnectivityError> {
    if ssid.is_empty() || ssid.len() > 32 || !is_printable_ascii(ssid) {
        return Err(ConnectivityError::InvalidSsid);
    }
    Ok(())
}

fn validate_password(password: &str) -> Result<(), ConnectivityError> {
    if password.is_empty() {
        return Ok(());
    }
    if password.len() < 8 || password.len() > 64 {
        return Err(ConnectivityError::InvalidPassword);
    }
    Ok(())
}

#[derive(Clone, PartialEq, Eq)]
pub struct WifiCredentials {
    ssid: heapless::String<32>,
    password: heapless::String<64>,
}

impl WifiCredentials {
    pub fn new(ssid: &str, password: &str) -> Result<Self, ConnectivityError> {
        validate_ssid(ssid)?;
        validate_password(password)?;
        let mut creds = Self {
            ssid: heapless::String::new(),
            password: heapless::String::new(),
        };
        creds
            .ssid
            .push_str(ssid)
            .map_err(|_| ConnectivityError::InvalidSsid)?;
        creds
            .password
            .push_str(password)
            .map_err(|_| ConnectivityError::InvalidPassword)?;
        Ok(creds)
    }

    /// Credentials captured from the build environment.
    pub fn from_build_env() -> Result<Self, ConnectivityError> {
        let ssid = option_env!("OTALINK_WIFI_SSID").ok_or(ConnectivityError::NoCredentials)?;
        Self::new(ssid, option_env!("OTALINK_WIFI_PASS").unwrap_or(""))
    }

    pub fn ssid(&self) -> &str {
        &self.ssid
    }

    pub fn is_open(&self) -> bool {
        self.password.is_empty()
    }
}

impl fmt::Debug for WifiCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WifiCredentials")
            .field("ssid", &self.ssid)
            .field("password", &"***")
            .finish()
    }
}

// ───────────────────────────────────────────────────────────────
// Station driver
// ───────────────────────────────────────────────────────────────

#[cfg(target_os = "espidf")]
pub use station::WifiAdapter;

#[cfg(target_os = "espidf")]
mod station {
    use std::time::Duration;

    use esp_idf_hal::modem::Modem;
    use esp_idf_svc::eventloop::EspSystemEventLoop;
    use esp_idf_svc::nvs::EspDefaultNvsPartition;
    use esp_idf_svc::sys::EspError;
    use esp_idf_svc::wifi::{AuthMethod, BlockingWifi, ClientConfiguration, Configuration, EspWifi};

    use super::*;

    const RETRY_DELAY: Duration = Duration::from_secs(2);

    fn driver(e: EspError) -> ConnectivityError {
        ConnectivityError::Driver(e.code())
    }

    /// Connected station interface. Dropping it stops WiFi.
    pub struct WifiAdapter {
        wifi: BlockingWifi<EspWifi<'static>>,
    }

    impl WifiAdapter {
        pub fn connect(
            modem: Modem,
            sys_loop: EspSystemEventLoop,
            nvs: Option<EspDefaultNvsPartition>,
            creds: &WifiCredentials,
            max_retries: u8,
        ) -> Result<Self, ConnectivityError> {
            let esp_wifi = EspWifi::new(modem, sys_loop.clone(), nvs).map_err(driver)?;
            let mut wifi = BlockingWifi::wrap(esp_wifi, sys_loop).map_err(driver)?;

            wifi.set_configuration(&Configuration::Client(ClientConfiguration {
                ssid: creds
                    .ssid()
                    .try_into()
                    .map_err(|_| ConnectivityError::InvalidSsid)?,
                password: creds
                    .password
                    .as_str()
                    .try_into()
                    .map_err(|_| ConnectivityError::InvalidPassword)?,
                auth_method: if creds.is_open() {
                    AuthMethod::None
                } else {
                    AuthMethod::WPA2Personal
                },
                ..Default::default()
            }))
            .map_err(driver)?;
            wifi.start().map_err(driver)?;
            info!("WiFi: started, connecting to '{}'", creds.ssid());

            for attempt in 1..=max_retries {
                match wifi.connect().and_then(|()| wifi.wait_netif_up()) {
                    Ok(()) => {
                        info!("WiFi: connected on attempt {}", attempt);
                        return Ok(Self { wifi });
                    }
                    Err(e) => {
                        warn!("WiFi: attempt {}/{} failed: {}", attempt, max_retries, e);
                        let _ = wifi.disconnect();
                        std::thread::sleep(RETRY_DELAY);
                    }
                }
            }
            Err(ConnectivityError::ConnectionFailed {
                attempts: max_retries,
            })
        }

        /// Station IPv4 address, for the startup banner.
        pub fn ip(&self) -> Option<std::net::Ipv4Addr> {
            self.wifi.wifi().sta_netif().get_ip_info().ok().map(|info| info.ip)
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Tests
// ───────────────────────────────────────────────────────────────
