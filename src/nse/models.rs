use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContractInfo {
    #[serde(rename = "expiryDates", default)]
    pub expiry_dates: Vec<String>,

    #[serde(rename = "strikePrice", default)]
    pub strike_prices: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptionChain {
    pub records: Records,

    #[serde(default)]
    pub filtered: Option<FilteredData>,
}

impl OptionChain {
    /// Rows for the requested expiry; `filtered` when the exchange sends it.
    pub fn rows(&self) -> &[OptionData] {
        match &self.filtered {
            Some(f) if !f.data.is_empty() => &f.data,
            _ => &self.records.data,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Records {
    #[serde(default)]
    pub timestamp: Option<String>,

    #[serde(rename = "underlyingValue")]
    pub underlying_value: f64,

    #[serde(default)]
    pub data: Vec<OptionData>,

    #[serde(rename = "expiryDates", default)]
    pub expiry_dates: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FilteredData {
    #[serde(default)]
    pub data: Vec<OptionData>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptionData {
    #[serde(rename = "expiryDates", alias = "expiryDate", default)]
    pub expiry_date: Option<String>,

    #[serde(rename = "strikePrice")]
    pub strike_price: Option<f64>,

    #[serde(rename = "CE", default)]
    pub call: Option<OptionDetail>,

    #[serde(rename = "PE", default)]
    pub put: Option<OptionDetail>,
}

impl OptionData {
    /// Call and put last traded prices, only when both legs are quoted.
    pub fn straddle_legs(&self) -> Option<(f64, f64)> {
        let call = self.call.as_ref()?.last_price?;
        let put = self.put.as_ref()?.last_price?;
        (call.is_finite() && put.is_finite()).then_some((call, put))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptionDetail {
    #[serde(rename = "strikePrice", default)]
    pub strike_price: Option<f64>,

    #[serde(rename = "underlyingValue", default)]
    pub underlying_value: Option<f64>,

    #[serde(rename = "lastPrice", default)]
    pub last_price: Option<f64>,
}
