use super::config;
use super::models::{ContractInfo, OptionChain};
use crate::error::QuoteError;
use crate::expiry::{format_exchange_date, parse_exchange_date};
use crate::models::Instrument;
use chrono::{Datelike, NaiveDate};
use rand::{seq::SliceRandom, thread_rng};
use reqwest::{Client, StatusCode, header};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio_retry::RetryIf;
use tokio_retry::strategy::ExponentialBackoff;
use tracing::{debug, info, warn};

// -----------------------------------------------
// CLIENT WRAPPER WITH SESSION STATE AND EXPIRY CACHE
// -----------------------------------------------
pub struct NSEClient {
    client: RwLock<Client>,
    base_url: String,
    timeout: Duration,
    warmed_up: Arc<RwLock<bool>>,
    // (symbol, computed expiry) -> listed expiry string
    expiry_cache: Arc<RwLock<HashMap<(String, NaiveDate), String>>>,
}

/// Listed contract for the month of `target`: the last listed date in that
/// month, else the first listed date on or after `target`.
pub fn select_monthly_expiry(listed: &[String], target: NaiveDate) -> Option<String> {
    let mut parsed: Vec<(NaiveDate, &String)> = listed
        .iter()
        .filter_map(|s| parse_exchange_date(s).map(|d| (d, s)))
        .collect();
    parsed.sort_by_key(|(d, _)| *d);

    let same_month = parsed
        .iter()
        .filter(|(d, _)| d.year() == target.year() && d.month() == target.month())
        .next_back();
    if let Some((_, raw)) = same_month {
        return Some((*raw).clone());
    }

    parsed
        .iter()
        .find(|(d, _)| *d >= target)
        .map(|(_, raw)| (*raw).clone())
}

impl NSEClient {
    pub fn new(timeout: Duration) -> Result<Self, QuoteError> {
        Self::with_base_url(config::NSE_BASE_URL, timeout)
    }

    pub fn with_base_url(base_url: impl Into<String>, timeout: Duration) -> Result<Self, QuoteError> {
        Ok(Self {
            client: RwLock::new(build_client(timeout)?),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout,
            warmed_up: Arc::new(RwLock::new(false)),
            expiry_cache: Arc::new(RwLock::new(HashMap::new())),
        })
    }

    /// Warmup NSE session (only once per session)
    async fn warmup_if_needed(&self) -> Result<(), QuoteError> {
        if *self.warmed_up.read().await {
            return Ok(());
        }

        let mut warmed = self.warmed_up.write().await;
        if !*warmed {
            let client = self.client.read().await.clone();
            client
                .get(format!("{}/", self.base_url))
                .header(header::ACCEPT, config::HEADER_ACCEPT_HTML)
                .send()
                .await?;

            tokio::time::sleep(Duration::from_millis(config::WARMUP_DELAY_MS)).await;
            *warmed = true;
            debug!(base_url = %self.base_url, "NSE session warmed up");
        }

        Ok(())
    }

    /// Drops cookies and cached expiries; the next request warms up a fresh session.
    pub async fn reset_session(&self) -> Result<(), QuoteError> {
        *self.client.write().await = build_client(self.timeout)?;
        *self.warmed_up.write().await = false;
        self.expiry_cache.write().await.clear();
        info!("NSE session reset");
        Ok(())
    }

    /// GET with retry on transport errors, 429 and 5xx
    async fn fetch_json(&self, url: &str) -> Result<String, QuoteError> {
        self.warmup_if_needed().await?;

        let backoff = ExponentialBackoff::from_millis(config::RETRY_BASE_DELAY_MS)
            .factor(config::RETRY_FACTOR)
            .max_delay(Duration::from_secs(config::RETRY_MAX_DELAY_SECS))
            .take(config::RETRY_MAX_ATTEMPTS);

        RetryIf::spawn(
            backoff,
            || async {
                let client = self.client.read().await.clone();
                let res = client
                    .get(url)
                    .header(header::ACCEPT, config::HEADER_ACCEPT_JSON)
                    .header(header::REFERER, config::HEADER_REFERER)
                    .header("X-Requested-With", config::HEADER_X_REQUESTED_WITH)
                    .send()
                    .await?;

                let status = res.status();
                debug!(url, status = status.as_u16(), "NSE response");

                if status.is_success() {
                    let text = res.text().await?;
                    let trimmed = text.trim();
                    if !trimmed.starts_with('{') && !trimmed.starts_with('[') {
                        let preview: String = text.chars().take(200).collect();
                        return Err(QuoteError::NonJsonResponse(preview));
                    }
                    Ok(text)
                } else if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
                    warn!(url, status = status.as_u16(), "retryable NSE status");
                    Err(QuoteError::Retryable(status.as_u16()))
                } else {
                    let body = res.text().await.unwrap_or_default();
                    Err(QuoteError::Client {
                        status: status.as_u16(),
                        preview: body.chars().take(200).collect(),
                    })
                }
            },
            QuoteError::is_retryable,
        )
        .await
    }

    pub async fn fetch_contract_info(&self, symbol: &str) -> Result<ContractInfo, QuoteError> {
        let url = config::nse_contract_info_url(&self.base_url, symbol);
        let text = self.fetch_json(&url).await?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Listed expiry string for `symbol` matching the computed monthly expiry. Cached per session.
    pub async fn resolve_listed_expiry(
        &self,
        symbol: &str,
        target: NaiveDate,
    ) -> Result<String, QuoteError> {
        let key = (symbol.to_string(), target);
        if let Some(cached) = self.expiry_cache.read().await.get(&key) {
            return Ok(cached.clone());
        }

        let info = self.fetch_contract_info(symbol).await?;
        let listed = match select_monthly_expiry(&info.expiry_dates, target) {
            Some(listed) => listed,
            None if info.expiry_dates.is_empty() => {
                // Contract info sometimes comes back empty; the computed date usually still works.
                warn!(symbol, %target, "no listed expiries, using computed date");
                format_exchange_date(target)
            }
            None => {
                return Err(QuoteError::NoExpiry {
                    symbol: symbol.to_string(),
                });
            }
        };

        debug!(symbol, %target, listed = %listed, "resolved listed expiry");
        self.expiry_cache.write().await.insert(key, listed.clone());
        Ok(listed)
    }

    pub async fn fetch_option_chain(
        &self,
        instrument: &Instrument,
        expiry: &str,
    ) -> Result<OptionChain, QuoteError> {
        let url = config::nse_option_chain_url(
            &self.base_url,
            instrument.security_type.as_str(),
            &instrument.symbol,
            expiry,
        );
        let text = self.fetch_json(&url).await?;
        Ok(serde_json::from_str(&text)?)
    }
}

// -----------------------------------------------
// HTTP CLIENT BUILDER
// -----------------------------------------------
fn build_client(timeout: Duration) -> Result<Client, QuoteError> {
    let mut headers = header::HeaderMap::new();

    let lang = config::ACCEPT_LANGUAGES
        .choose(&mut thread_rng())
        .copied()
        .unwrap_or("en-US,en;q=0.9");
    headers.insert(
        header::ACCEPT_LANGUAGE,
        header::HeaderValue::from_static(lang),
    );
    headers.insert(header::ACCEPT, header::HeaderValue::from_static("*/*"));

    Ok(Client::builder()
        .default_headers(headers)
        .cookie_store(true)
        .user_agent(config::USER_AGENT)
        .timeout(timeout)
        .build()?)
}
