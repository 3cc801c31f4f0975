//! Financial data tools
//!
//! The catalog is a closed enum; each variant declares its contract and the
//! Financial Datasets endpoint that serves it.

use super::{ParamSpec, ParamType, ToolBackend, ToolSpec};
use crate::error::AgentError;
use crate::Result;
use reqwest::Client;
use serde_json::{Map, Value};
use std::time::Duration;
use tracing::debug;

const PERIODS: &[&str] = &["annual", "quarterly", "ttm"];
const INTERVALS: &[&str] = &["minute", "day", "week", "month", "year"];
const FILING_TYPES: &[&str] = &["10-K", "10-Q", "8-K"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinanceTool {
    IncomeStatements,
    BalanceSheets,
    CashFlowStatements,
    AllFinancialStatements,
    Filings,
    TenKFilingItems,
    TenQFilingItems,
    EightKFilingItems,
    PriceSnapshot,
    Prices,
    FinancialMetricsSnapshot,
    FinancialMetrics,
    News,
    AnalystEstimates,
    SegmentedRevenues,
}

impl FinanceTool {
    pub const ALL: [FinanceTool; 15] = [
        FinanceTool::IncomeStatements,
        FinanceTool::BalanceSheets,
        FinanceTool::CashFlowStatements,
        FinanceTool::AllFinancialStatements,
        FinanceTool::Filings,
        FinanceTool::TenKFilingItems,
        FinanceTool::TenQFilingItems,
        FinanceTool::EightKFilingItems,
        FinanceTool::PriceSnapshot,
        FinanceTool::Prices,
        FinanceTool::FinancialMetricsSnapshot,
        FinanceTool::FinancialMetrics,
        FinanceTool::News,
        FinanceTool::AnalystEstimates,
        FinanceTool::SegmentedRevenues,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            FinanceTool::IncomeStatements => "get_income_statements",
            FinanceTool::BalanceSheets => "get_balance_sheets",
            FinanceTool::CashFlowStatements => "get_cash_flow_statements",
            FinanceTool::AllFinancialStatements => "get_all_financial_statements",
            FinanceTool::Filings => "get_filings",
            FinanceTool::TenKFilingItems => "get_10K_filing_items",
            FinanceTool::TenQFilingItems => "get_10Q_filing_items",
            FinanceTool::EightKFilingItems => "get_8K_filing_items",
            FinanceTool::PriceSnapshot => "get_price_snapshot",
            FinanceTool::Prices => "get_prices",
            FinanceTool::FinancialMetricsSnapshot => "get_financial_metrics_snapshot",
            FinanceTool::FinancialMetrics => "get_financial_metrics",
            FinanceTool::News => "get_news",
            FinanceTool::AnalystEstimates => "get_analyst_estimates",
            FinanceTool::SegmentedRevenues => "get_segmented_revenues",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|t| t.name() == name)
    }

    pub fn specs() -> Vec<ToolSpec> {
        Self::ALL.iter().map(FinanceTool::spec).collect()
    }

    pub fn spec(&self) -> ToolSpec {
        use ParamType::{Integer, String};

        let ticker = ParamSpec::required("ticker", String, "Stock ticker symbol, e.g. AAPL");
        let period = ParamSpec::required("period", String, "Reporting period").one_of(PERIODS);
        let limit = ParamSpec::optional("limit", Integer, "Maximum number of periods to return");
        let period_gte = ParamSpec::optional(
            "report_period_gte",
            String,
            "Only periods on or after this date (YYYY-MM-DD)",
        );
        let period_lte = ParamSpec::optional(
            "report_period_lte",
            String,
            "Only periods on or before this date (YYYY-MM-DD)",
        );

        let statement_params = vec![ticker, period, limit, period_gte, period_lte];

        let (description, label, params) = match self {
            FinanceTool::IncomeStatements => (
                "Income statements: revenue, expenses, net income, EPS",
                "income statements",
                statement_params,
            ),
            FinanceTool::BalanceSheets => (
                "Balance sheets: assets, liabilities, shareholders' equity",
                "balance sheets",
                statement_params,
            ),
            FinanceTool::CashFlowStatements => (
                "Cash flow statements: operating, investing, financing cash flows",
                "cash flow statements",
                statement_params,
            ),
            FinanceTool::AllFinancialStatements => (
                "Income statements, balance sheets and cash flow statements in one call",
                "financial statements",
                statement_params,
            ),
            FinanceTool::Filings => (
                "List of SEC filings for a company",
                "SEC filings",
                vec![
                    ticker,
                    ParamSpec::optional("filing_type", String, "Filing form type")
                        .one_of(FILING_TYPES),
                    limit,
                ],
            ),
            FinanceTool::TenKFilingItems => (
                "Sections of an annual 10-K filing (e.g. Item-1, Item-7)",
                "10-K filing items",
                vec![
                    ticker,
                    ParamSpec::required("year", Integer, "Fiscal year of the filing"),
                    ParamSpec::optional("item", String, "Specific item to return, e.g. Item-7"),
                ],
            ),
            FinanceTool::TenQFilingItems => (
                "Sections of a quarterly 10-Q filing",
                "10-Q filing items",
                vec![
                    ticker,
                    ParamSpec::required("year", Integer, "Fiscal year of the filing"),
                    ParamSpec::required("quarter", Integer, "Fiscal quarter, 1-4"),
                    ParamSpec::optional("item", String, "Specific item to return, e.g. Part-1,Item-2"),
                ],
            ),
            FinanceTool::EightKFilingItems => (
                "Items of a current-report 8-K filing",
                "8-K filing items",
                vec![
                    ticker,
                    ParamSpec::required("accession_number", String, "SEC accession number"),
                ],
            ),
            FinanceTool::PriceSnapshot => (
                "Latest price quote for a stock",
                "price snapshot",
                vec![ticker],
            ),
            FinanceTool::Prices => (
                "Historical OHLCV price bars",
                "price history",
                vec![
                    ticker,
                    ParamSpec::required("interval", String, "Bar interval").one_of(INTERVALS),
                    ParamSpec::optional("interval_multiplier", Integer, "Bars per interval, default 1"),
                    ParamSpec::required("start_date", String, "Start date (YYYY-MM-DD)"),
                    ParamSpec::required("end_date", String, "End date (YYYY-MM-DD)"),
                ],
            ),
            FinanceTool::FinancialMetricsSnapshot => (
                "Current valuation and profitability metrics (P/E, margins, market cap)",
                "financial metrics snapshot",
                vec![ticker],
            ),
            FinanceTool::FinancialMetrics => (
                "Historical financial metrics per reporting period",
                "financial metrics",
                vec![ticker, period, limit, period_gte, period_lte],
            ),
            FinanceTool::News => (
                "Recent news articles about a company",
                "news",
                vec![
                    ticker,
                    ParamSpec::optional("limit", Integer, "Maximum number of articles"),
                ],
            ),
            FinanceTool::AnalystEstimates => (
                "Analyst consensus estimates (EPS, revenue)",
                "analyst estimates",
                vec![
                    ticker,
                    ParamSpec::optional("period", String, "Estimate period").one_of(&["annual", "quarterly"]),
                ],
            ),
            FinanceTool::SegmentedRevenues => (
                "Revenue broken down by business segment and geography",
                "segmented revenues",
                vec![ticker, period, limit],
            ),
        };

        ToolSpec {
            name: self.name(),
            description,
            label,
            params,
        }
    }

    /// API path plus any query parameters the tool fixes on its own
    fn endpoint(&self) -> (&'static str, &'static [(&'static str, &'static str)]) {
        match self {
            FinanceTool::IncomeStatements => ("/financials/income-statements/", &[]),
            FinanceTool::BalanceSheets => ("/financials/balance-sheets/", &[]),
            FinanceTool::CashFlowStatements => ("/financials/cash-flow-statements/", &[]),
            FinanceTool::AllFinancialStatements => ("/financials/", &[]),
            FinanceTool::Filings => ("/filings/", &[]),
            FinanceTool::TenKFilingItems => ("/filings/items/", &[("filing_type", "10-K")]),
            FinanceTool::TenQFilingItems => ("/filings/items/", &[("filing_type", "10-Q")]),
            FinanceTool::EightKFilingItems => ("/filings/items/", &[("filing_type", "8-K")]),
            FinanceTool::PriceSnapshot => ("/prices/snapshot/", &[]),
            FinanceTool::Prices => ("/prices/", &[]),
            FinanceTool::FinancialMetricsSnapshot => ("/financial-metrics/snapshot/", &[]),
            FinanceTool::FinancialMetrics => ("/financial-metrics/", &[]),
            FinanceTool::News => ("/news/", &[]),
            FinanceTool::AnalystEstimates => ("/analyst-estimates/", &[]),
            FinanceTool::SegmentedRevenues => ("/financials/segmented-revenues/", &[]),
        }
    }
}

/// Query-string pairs for a validated argument map
fn query_pairs(tool: FinanceTool, arguments: &Map<String, Value>) -> Vec<(String, String)> {
    let (_, fixed) = tool.endpoint();
    let mut pairs: Vec<(String, String)> = fixed
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

    for (key, value) in arguments {
        let rendered = match value {
            Value::Null => continue,
            Value::String(s) if key == "ticker" => s.to_uppercase(),
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        pairs.push((key.clone(), rendered));
    }

    pairs
}

/// HTTP backend for https://api.financialdatasets.ai
#[derive(Clone)]
pub struct FinancialDatasetsBackend {
    client: Client,
    base_url: String,
    api_key: String,
}

impl FinancialDatasetsBackend {
    pub fn new(base_url: String, api_key: String) -> Result<Self> {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(60))
            .pool_max_idle_per_host(8)
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    async fn get_json(&self, path: &str, query: &[(String, String)]) -> Result<Value> {
        let url = format!("{}{}", self.base_url, path);

        let response = self
            .client
            .get(url)
            .header("X-API-KEY", &self.api_key)
            .query(query)
            .send()
            .await
            .map_err(|e| {
                AgentError::ToolInvocation(format!(
                    "Financial API request failed for {}: {}",
                    path, e
                ))
            })?;

        let status = response.status();
        let body = response
            .json::<Value>()
            .await
            .map_err(|e| AgentError::ToolInvocation(format!("Invalid JSON response: {}", e)))?;

        if !status.is_success() {
            return Err(AgentError::ToolInvocation(format!(
                "Financial API returned {} for {}: {}",
                status, path, body
            )));
        }

        Ok(body)
    }
}

#[async_trait::async_trait]
impl ToolBackend for FinancialDatasetsBackend {
    async fn invoke(&self, tool: &ToolSpec, arguments: &Map<String, Value>) -> Result<Value> {
        let finance_tool = FinanceTool::from_name(tool.name)
            .ok_or_else(|| AgentError::ToolNotFound(tool.name.to_string()))?;

        if self.api_key.is_empty() {
            return Err(AgentError::ToolInvocation(
                "FINANCIAL_DATASETS_API_KEY is not configured".to_string(),
            ));
        }

        let (path, _) = finance_tool.endpoint();
        let query = query_pairs(finance_tool, arguments);

        debug!(tool = tool.name, path, "Calling financial data API");

        self.get_json(path, &query).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_names_round_trip_and_unique() {
        for tool in FinanceTool::ALL {
            assert_eq!(FinanceTool::from_name(tool.name()), Some(tool));
        }
        let mut names: Vec<_> = FinanceTool::ALL.iter().map(|t| t.name()).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), FinanceTool::ALL.len());
        assert_eq!(FinanceTool::from_name("search_google_news"), None);
    }

    #[test]
    fn test_every_spec_requires_ticker() {
        for spec in FinanceTool::specs() {
            let ticker = spec.params.iter().find(|p| p.name == "ticker").unwrap();
            assert!(ticker.required, "{} should require ticker", spec.name);
        }
    }

    #[test]
    fn test_query_pairs_include_fixed_filing_type() {
        let arguments = json!({ "ticker": "acme", "year": 2023, "item": null })
            .as_object()
            .cloned()
            .unwrap();
        let pairs = query_pairs(FinanceTool::TenKFilingItems, &arguments);
        assert!(pairs.contains(&("filing_type".to_string(), "10-K".to_string())));
        assert!(pairs.contains(&("ticker".to_string(), "ACME".to_string())));
        assert!(pairs.contains(&("year".to_string(), "2023".to_string())));
        assert!(!pairs.iter().any(|(k, _)| k == "item"));
    }

    #[tokio::test]
    async fn test_missing_api_key_is_invocation_error() {
        let backend =
            FinancialDatasetsBackend::new("http://127.0.0.1:9".to_string(), String::new()).unwrap();
        let spec = FinanceTool::PriceSnapshot.spec();
        let arguments = json!({ "ticker": "ACME" }).as_object().cloned().unwrap();
        let err = backend.invoke(&spec, &arguments).await.unwrap_err();
        assert!(matches!(err, AgentError::ToolInvocation(_)));
    }
}
