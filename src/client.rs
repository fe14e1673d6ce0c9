//! HTTP client for the travel-booking SOAP service

use crate::config::SoapConfig;
use crate::parser::extract_fault;
use crate::{Result, TravelChatError};
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::Client;
use tracing::{debug, error, info, instrument};

const SOAP_ENVELOPE_NS: &str = "http://schemas.xmlsoap.org/soap/envelope/";

/// Client submitting free-text travel plans to the SOAP endpoint
pub struct TravelClient {
    http_client: Client,
    config: SoapConfig,
}

impl TravelClient {
    /// Create a new travel client
    pub fn new(config: &SoapConfig) -> Result<Self> {
        debug!(endpoint = %config.endpoint, "Creating new travel client");
        let http_client = Client::builder()
            .user_agent(config.user_agent.as_str())
            .timeout(config.timeout())
            .build()?;

        Ok(Self {
            http_client,
            config: config.clone(),
        })
    }

    /// Send the plan to the service and return the raw SOAP response body
    #[instrument(level = "info", skip(self, plan), fields(plan_length = plan.len()))]
    pub async fn get_travel_plan_details(&self, plan: &str) -> Result<String> {
        let plan = plan.trim();
        if plan.is_empty() {
            return Err(TravelChatError::EmptyInput("travel plan"));
        }

        let envelope = self.build_envelope(plan);
        debug!(envelope_length = envelope.len(), "Built SOAP envelope");

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/xml; charset=utf-8"));
        let action = HeaderValue::from_str(&format!("\"{}\"", self.config.action))
            .map_err(|e| TravelChatError::Config(format!("Invalid SOAPAction header: {}", e)))?;
        headers.insert("SOAPAction", action);

        info!(endpoint = %self.config.endpoint, "Making SOAP request");
        let start_time = std::time::Instant::now();
        let response = self
            .http_client
            .post(&self.config.endpoint)
            .headers(headers)
            .body(envelope)
            .send()
            .await?;
        let status = response.status();
        let status_error = response.error_for_status_ref().err();

        let body = response.text().await?;
        info!(
            status = %status,
            duration_ms = start_time.elapsed().as_millis(),
            body_length = body.len(),
            "SOAP request completed"
        );

        // SOAP 1.1 reports faults with a 500 status and a Fault body
        if let Some(fault) = extract_fault(&body) {
            error!(status = %status, fault = %fault, "Service returned a SOAP fault");
            return Err(TravelChatError::SoapFault(fault));
        }

        if let Some(e) = status_error {
            error!(status = %status, "SOAP request failed");
            return Err(TravelChatError::Http(e));
        }

        Ok(body)
    }

    fn build_envelope(&self, plan: &str) -> String {
        let SoapConfig {
            namespace,
            operation,
            parameter,
            ..
        } = &self.config;

        format!(
            concat!(
                r#"<?xml version="1.0" encoding="utf-8"?>"#,
                r#"<soap:Envelope xmlns:soap="{envelope_ns}">"#,
                "<soap:Body>",
                r#"<{op} xmlns="{ns}"><{param}>{plan}</{param}></{op}>"#,
                "</soap:Body>",
                "</soap:Envelope>"
            ),
            envelope_ns = SOAP_ENVELOPE_NS,
            op = operation,
            ns = escape_xml(namespace),
            param = parameter,
            plan = escape_xml(plan),
        )
    }
}

/// Escape the five XML special characters
pub(crate) fn escape_xml(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_travel_client_creation() {
        let client = TravelClient::new(&SoapConfig::default());
        assert!(client.is_ok());
    }

    #[test]
    fn test_escape_xml() {
        assert_eq!(escape_xml("plain"), "plain");
        assert_eq!(
            escape_xml(r#"Tom & "Jerry" <2> 'x'"#),
            "Tom &amp; &quot;Jerry&quot; &lt;2&gt; &apos;x&apos;"
        );
    }

    #[test]
    fn test_envelope_wraps_escaped_plan() {
        let client = TravelClient::new(&SoapConfig::default()).unwrap();
        let envelope = client.build_envelope("London -> Paris & back");

        assert!(envelope.starts_with(r#"<?xml version="1.0""#));
        assert!(envelope.contains(r#"<soap:Envelope xmlns:soap="http://schemas.xmlsoap.org/soap/envelope/">"#));
        assert!(envelope.contains(r#"<GetTravelPlanDetails xmlns="http://travel.example.com/">"#));
        assert!(envelope.contains("<request>London -&gt; Paris &amp; back</request>"));
        assert!(envelope.ends_with("</soap:Body></soap:Envelope>"));
    }

    #[tokio::test]
    async fn test_empty_plan_rejected() {
        let client = TravelClient::new(&SoapConfig::default()).unwrap();
        let result = client.get_travel_plan_details("   ").await;
        assert!(matches!(result, Err(TravelChatError::EmptyInput(_))));
    }
}
