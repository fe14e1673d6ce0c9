//! SOAP response parser extracting per-passenger flight details

use crate::{FlightDetails, FlightPrice, Result, TravelChatError};
use regex::Regex;
use scraper::{ElementRef, Html};
use serde::ser::{Serialize, SerializeMap, Serializer};
use tracing::{debug, warn};

const UNKNOWN: &str = "Unknown";

const PASSENGER_TAGS: &[&str] = &["passenger", "traveler", "traveller"];
const NAME_TAGS: &[&str] = &["name", "passengername", "travelername", "fullname"];
const FLIGHT_TAGS: &[&str] = &["flight", "segment", "flightsegment", "leg"];

// Aliases are compared against normalized local names (see `normalize_name`)
const DEPARTURE_CITY: &[&str] = &["departurecity", "origincity", "fromcity"];
const ARRIVAL_CITY: &[&str] = &["arrivalcity", "destinationcity", "tocity"];
const DEPARTURE_DATE: &[&str] = &["departuredate"];
const DEPARTURE_TIME: &[&str] = &["departuretime"];
const ARRIVAL_DATE: &[&str] = &["arrivaldate"];
const ARRIVAL_TIME: &[&str] = &["arrivaltime"];
const PRICE: &[&str] = &["price", "totalprice", "fare", "totalfare"];

/// Flight details keyed by passenger name, in the order passengers first appeared
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PassengerFlights {
    entries: Vec<(String, FlightDetails)>,
}

impl PassengerFlights {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the details for `passenger`, keeping its original position
    pub fn insert(&mut self, passenger: String, details: FlightDetails) {
        match self.entries.iter_mut().find(|(name, _)| *name == passenger) {
            Some(entry) => entry.1 = details,
            None => self.entries.push((passenger, details)),
        }
    }

    pub fn get(&self, passenger: &str) -> Option<&FlightDetails> {
        self.entries
            .iter()
            .find(|(name, _)| name == passenger)
            .map(|(_, details)| details)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FlightDetails)> {
        self.entries.iter().map(|(name, details)| (name.as_str(), details))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Serialize for PassengerFlights {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (name, details) in &self.entries {
            map.serialize_entry(name, details)?;
        }
        map.end()
    }
}

/// Parser for travel-booking SOAP responses
///
/// The response is read with an HTML5 tree builder, so it is first normalized:
/// self-closing elements are expanded and CDATA sections are turned into text.
pub struct FlightDetailsParser {
    self_closing: Regex,
    cdata: Regex,
    price: Regex,
}

impl FlightDetailsParser {
    pub fn new() -> Result<Self> {
        debug!("Initializing SOAP response parser");
        Ok(Self {
            self_closing: Regex::new(r"<([A-Za-z_][\w:.\-]*)((?:\s[^<>]*?)?)\s*/>")
                .map_err(|e| TravelChatError::Parse(format!("Invalid self-closing pattern: {}", e)))?,
            cdata: Regex::new(r"(?s)<!\[CDATA\[(.*?)\]\]>")
                .map_err(|e| TravelChatError::Parse(format!("Invalid CDATA pattern: {}", e)))?,
            price: Regex::new(
                r"^\s*(?P<pre>[^\d\s.,]*)\s*(?P<amount>\d[\d,]*(?:\.\d+)?)\s*(?P<post>[^\d\s.,]*)\s*$",
            )
            .map_err(|e| TravelChatError::Parse(format!("Invalid price pattern: {}", e)))?,
        })
    }

    pub fn parse(&self, soap: &str) -> Result<PassengerFlights> {
        debug!(response_length = soap.len(), "Starting SOAP parsing");
        let document = self.load(soap);

        if let Some(fault) = fault_text(&document) {
            return Err(TravelChatError::SoapFault(fault));
        }

        let mut flights = PassengerFlights::new();
        let passengers = document
            .root_element()
            .descendants()
            .filter_map(ElementRef::wrap)
            .filter(|el| is_passenger(el));

        for (i, passenger) in passengers.enumerate() {
            let name = passenger_name(&passenger).unwrap_or_else(|| {
                warn!(index = i, "Passenger name not found, using position");
                format!("Passenger {}", i + 1)
            });

            let details = self.extract_details(&passenger, &name);
            flights.insert(name, details);
        }

        if flights.is_empty() {
            return Err(TravelChatError::Parse("No passengers found in response".to_string()));
        }

        debug!(passengers = flights.len(), "SOAP parsing completed");
        Ok(flights)
    }

    fn load(&self, soap: &str) -> Html {
        let text = self.cdata.replace_all(soap, |caps: &regex::Captures| {
            crate::client::escape_xml(&caps[1])
        });
        let text = self.self_closing.replace_all(&text, "<$1$2></$1>");
        Html::parse_document(&text)
    }

    fn extract_details(&self, passenger: &ElementRef, name: &str) -> FlightDetails {
        let field = |aliases: &[&str], label: &str| -> String {
            find_field(passenger, aliases)
                .map(|el| element_text(&el))
                .filter(|text| !text.is_empty())
                .unwrap_or_else(|| {
                    warn!(passenger = name, field = label, "Flight field not found");
                    UNKNOWN.to_string()
                })
        };

        let price_element = find_field(passenger, PRICE);
        let price = price_element
            .as_ref()
            .map(element_text)
            .filter(|text| !text.is_empty())
            .unwrap_or_else(|| {
                warn!(passenger = name, field = "price", "Flight field not found");
                UNKNOWN.to_string()
            });
        let currency_attr = price_element
            .as_ref()
            .and_then(|el| attr_ignore_case(el, "currency"));

        FlightDetails {
            departure_city: field(DEPARTURE_CITY, "departure_city"),
            arrival_city: field(ARRIVAL_CITY, "arrival_city"),
            departure_date: field(DEPARTURE_DATE, "departure_date"),
            departure_time: field(DEPARTURE_TIME, "departure_time"),
            arrival_date: field(ARRIVAL_DATE, "arrival_date"),
            arrival_time: field(ARRIVAL_TIME, "arrival_time"),
            parsed_price: self.parse_price(&price, currency_attr),
            price,
        }
    }

    /// Split price text such as `$350`, `USD 350.00` or `350.00 EUR`
    pub fn parse_price(&self, price_text: &str, currency_hint: Option<String>) -> Option<FlightPrice> {
        let captures = self.price.captures(price_text)?;
        let amount = captures["amount"].replace(',', "").parse::<f64>().ok()?;

        let currency = [captures.name("pre"), captures.name("post")]
            .into_iter()
            .flatten()
            .map(|m| m.as_str().trim())
            .find(|s| !s.is_empty())
            .map(str::to_string)
            .or(currency_hint)?;

        Some(FlightPrice { amount, currency })
    }
}

/// Return the fault string if `soap` is a SOAP fault message.
pub fn extract_fault(soap: &str) -> Option<String> {
    // Cheap pre-check so successful responses are not parsed twice
    if !soap.contains("Fault") && !soap.contains("fault") {
        return None;
    }
    fault_text(&Html::parse_document(soap))
}

fn fault_text(document: &Html) -> Option<String> {
    let fault = document
        .root_element()
        .descendants()
        .filter_map(ElementRef::wrap)
        .find(|el| normalize_name(el.value().name()) == "fault")?;

    // SOAP 1.1 uses faultstring, SOAP 1.2 nests Reason/Text
    let message = fault
        .descendants()
        .filter_map(ElementRef::wrap)
        .find(|el| matches!(normalize_name(el.value().name()).as_str(), "faultstring" | "reason"))
        .map(|el| element_text(&el))
        .unwrap_or_else(|| element_text(&fault));

    Some(if message.is_empty() {
        "unspecified fault".to_string()
    } else {
        message
    })
}

/// Local name without namespace prefix, lowercased, with `_` and `-` removed
fn normalize_name(name: &str) -> String {
    name.rsplit(':')
        .next()
        .unwrap_or(name)
        .chars()
        .filter(|c| *c != '_' && *c != '-')
        .flat_map(char::to_lowercase)
        .collect()
}

fn name_matches(el: &ElementRef, aliases: &[&str]) -> bool {
    let name = normalize_name(el.value().name());
    aliases.iter().any(|alias| *alias == name)
}

fn is_passenger(el: &ElementRef) -> bool {
    name_matches(el, PASSENGER_TAGS)
}

fn element_text(el: &ElementRef) -> String {
    el.text().collect::<String>().split_whitespace().collect::<Vec<_>>().join(" ")
}

fn attr_ignore_case(el: &ElementRef, attr: &str) -> Option<String> {
    el.value()
        .attrs()
        .find(|(name, _)| normalize_name(name) == attr)
        .map(|(_, value)| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn passenger_name(passenger: &ElementRef) -> Option<String> {
    let child = |aliases: &[&str]| {
        passenger
            .descendants()
            .filter_map(ElementRef::wrap)
            .find(|el| name_matches(el, aliases))
            .map(|el| element_text(&el))
            .filter(|text| !text.is_empty())
    };

    if let Some(name) = child(NAME_TAGS) {
        return Some(name);
    }

    match (child(&["firstname", "givenname"]), child(&["lastname", "surname", "familyname"])) {
        (Some(first), Some(last)) => return Some(format!("{} {}", first, last)),
        (Some(only), None) | (None, Some(only)) => return Some(only),
        (None, None) => {}
    }

    if let Some(name) = attr_ignore_case(passenger, "name") {
        return Some(name);
    }

    // <Passenger>Jane Doe</Passenger> inside a flight element
    let has_children = passenger.children().any(|node| node.value().is_element());
    if !has_children {
        let text = element_text(passenger);
        if !text.is_empty() {
            return Some(text);
        }
    }

    None
}

/// Find a field element for `passenger`.
///
/// Looks in the passenger's own subtree first, then in each enclosing element
/// up to and including the nearest flight or segment. Matches that belong to
/// other passengers, or to sibling groups holding other passengers, are skipped.
fn find_field<'a>(passenger: &ElementRef<'a>, aliases: &[&str]) -> Option<ElementRef<'a>> {
    if let Some(found) = passenger
        .descendants()
        .filter_map(ElementRef::wrap)
        .find(|el| name_matches(el, aliases))
    {
        return Some(found);
    }

    for scope in passenger.ancestors().filter_map(ElementRef::wrap) {
        let found = scope
            .descendants()
            .filter_map(ElementRef::wrap)
            .filter(|el| name_matches(el, aliases))
            .find(|el| !in_other_group(el, &scope));
        if found.is_some() {
            return found;
        }
        if name_matches(&scope, FLIGHT_TAGS) {
            break;
        }
    }

    None
}

/// Whether `el` sits, below `scope`, inside an element that holds a passenger
fn in_other_group(el: &ElementRef, scope: &ElementRef) -> bool {
    el.ancestors()
        .take_while(|node| node.id() != scope.id())
        .filter_map(ElementRef::wrap)
        .any(|ancestor| ancestor.descendants().filter_map(ElementRef::wrap).any(|d| is_passenger(&d)))
}

#[cfg(test)]
mod tests {
    use super::*;

    const NESTED_RESPONSE: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<soap:Envelope xmlns:soap="http://schemas.xmlsoap.org/soap/envelope/">
  <soap:Body>
    <ns1:GetTravelPlanDetailsResponse xmlns:ns1="http://travel.example.com/">
      <ns1:Passengers>
        <ns1:Passenger>
          <ns1:Name>Alice Smith</ns1:Name>
          <ns1:DepartureCity>London</ns1:DepartureCity>
          <ns1:ArrivalCity>Paris</ns1:ArrivalCity>
          <ns1:DepartureDate>2024-05-01</ns1:DepartureDate>
          <ns1:DepartureTime>09:00</ns1:DepartureTime>
          <ns1:ArrivalDate>2024-05-01</ns1:ArrivalDate>
          <ns1:ArrivalTime>11:15</ns1:ArrivalTime>
          <ns1:Price currency="GBP">120.50</ns1:Price>
        </ns1:Passenger>
        <ns1:Passenger>
          <ns1:FirstName>Bob</ns1:FirstName>
          <ns1:LastName>Jones</ns1:LastName>
          <ns1:departure_city>Berlin</ns1:departure_city>
          <ns1:arrival_city>Rome</ns1:arrival_city>
          <ns1:departure_date>2024-06-10</ns1:departure_date>
          <ns1:departure_time>14:30</ns1:departure_time>
          <ns1:arrival_date>2024-06-10</ns1:arrival_date>
          <ns1:arrival_time>16:40</ns1:arrival_time>
          <ns1:price>EUR 89</ns1:price>
        </ns1:Passenger>
      </ns1:Passengers>
    </ns1:GetTravelPlanDetailsResponse>
  </soap:Body>
</soap:Envelope>"#;

    const SHARED_FLIGHT_RESPONSE: &str = r#"<soap:Envelope xmlns:soap="http://schemas.xmlsoap.org/soap/envelope/">
  <soap:Body>
    <Itinerary>
      <Flight>
        <DepartureCity>New York</DepartureCity>
        <ArrivalCity>Tokyo</ArrivalCity>
        <DepartureDate>2024-07-01</DepartureDate>
        <DepartureTime>10:00</DepartureTime>
        <ArrivalDate>2024-07-02</ArrivalDate>
        <ArrivalTime>14:00</ArrivalTime>
        <Passenger>Carol White</Passenger>
        <Passenger><Name>Dan Brown</Name><Price>$1,250</Price></Passenger>
        <Price>$1,100</Price>
      </Flight>
    </Itinerary>
  </soap:Body>
</soap:Envelope>"#;

    #[test]
    fn test_parser_creation() {
        assert!(FlightDetailsParser::new().is_ok());
    }

    #[test]
    fn test_parse_nested_passengers() {
        let parser = FlightDetailsParser::new().unwrap();
        let flights = parser.parse(NESTED_RESPONSE).unwrap();
        assert_eq!(flights.len(), 2);

        let names: Vec<_> = flights.iter().map(|(name, _)| name).collect();
        assert_eq!(names, vec!["Alice Smith", "Bob Jones"]);

        let alice = flights.get("Alice Smith").unwrap();
        assert_eq!(alice.departure_city, "London");
        assert_eq!(alice.arrival_city, "Paris");
        assert_eq!(alice.departure_time, "09:00");
        assert_eq!(alice.arrival_time, "11:15");
        assert_eq!(alice.price, "120.50");
        assert_eq!(
            alice.parsed_price,
            Some(FlightPrice { amount: 120.5, currency: "GBP".to_string() })
        );

        let bob = flights.get("Bob Jones").unwrap();
        assert_eq!(bob.departure_city, "Berlin");
        assert_eq!(bob.arrival_date, "2024-06-10");
        assert_eq!(bob.price, "EUR 89");
        assert_eq!(bob.parsed_price.as_ref().map(|p| p.currency.as_str()), Some("EUR"));
    }

    #[test]
    fn test_parse_fields_from_enclosing_flight() {
        let parser = FlightDetailsParser::new().unwrap();
        let flights = parser.parse(SHARED_FLIGHT_RESPONSE).unwrap();
        assert_eq!(flights.len(), 2);

        let carol = flights.get("Carol White").unwrap();
        assert_eq!(carol.departure_city, "New York");
        assert_eq!(carol.arrival_date, "2024-07-02");
        // Dan's own price must not leak into Carol's details
        assert_eq!(carol.price, "$1,100");

        let dan = flights.get("Dan Brown").unwrap();
        assert_eq!(dan.arrival_city, "Tokyo");
        assert_eq!(dan.price, "$1,250");
        assert_eq!(
            dan.parsed_price,
            Some(FlightPrice { amount: 1250.0, currency: "$".to_string() })
        );
    }

    #[test]
    fn test_fields_do_not_cross_flights() {
        let parser = FlightDetailsParser::new().unwrap();
        let xml = r#"<Itinerary>
<Flight><DepartureCity>London</DepartureCity><Price>$100</Price><Passenger><Name>Ann</Name></Passenger></Flight>
<Flight><DepartureCity>Rome</DepartureCity><Passenger><Name>Ben</Name></Passenger></Flight>
</Itinerary>"#;
        let flights = parser.parse(xml).unwrap();

        let ann = flights.get("Ann").unwrap();
        assert_eq!(ann.departure_city, "London");
        assert_eq!(ann.price, "$100");

        let ben = flights.get("Ben").unwrap();
        assert_eq!(ben.departure_city, "Rome");
        assert_eq!(ben.price, UNKNOWN);
        assert!(ben.parsed_price.is_none());
    }

    #[test]
    fn test_segment_fields_reach_wrapped_travellers() {
        let parser = FlightDetailsParser::new().unwrap();
        let xml = r#"<Booking>
<Segment><DepartureCity>Oslo</DepartureCity><Price>NOK 900</Price>
  <Travellers><Traveller><Name>Cy</Name></Traveller></Travellers></Segment>
<Segment><ArrivalCity>Bergen</ArrivalCity>
  <Travellers><Traveller><Name>Di</Name><Price>NOK 500</Price></Traveller></Travellers></Segment>
</Booking>"#;
        let flights = parser.parse(xml).unwrap();

        let cy = flights.get("Cy").unwrap();
        assert_eq!(cy.departure_city, "Oslo");
        assert_eq!(cy.price, "NOK 900");
        assert_eq!(cy.arrival_city, UNKNOWN);

        let di = flights.get("Di").unwrap();
        assert_eq!(di.arrival_city, "Bergen");
        assert_eq!(di.departure_city, UNKNOWN);
        assert_eq!(di.price, "NOK 500");
    }

    #[test]
    fn test_groups_without_flight_elements_stay_apart() {
        let parser = FlightDetailsParser::new().unwrap();
        let xml = r#"<Trip>
<Group><DepartureCity>Lima</DepartureCity><Passenger><Name>Eli</Name></Passenger></Group>
<Group><Passenger><Name>Fay</Name></Passenger></Group>
</Trip>"#;
        let flights = parser.parse(xml).unwrap();
        assert_eq!(flights.get("Eli").unwrap().departure_city, "Lima");
        assert_eq!(flights.get("Fay").unwrap().departure_city, UNKNOWN);
    }

    #[test]
    fn test_missing_fields_are_unknown() {
        let parser = FlightDetailsParser::new().unwrap();
        let xml = "<soap:Envelope><soap:Body><Passenger><Name>Eve</Name><DepartureCity>Oslo</DepartureCity><ArrivalTime/></Passenger></soap:Body></soap:Envelope>";
        let flights = parser.parse(xml).unwrap();
        let eve = flights.get("Eve").unwrap();
        assert_eq!(eve.departure_city, "Oslo");
        assert_eq!(eve.arrival_city, UNKNOWN);
        assert_eq!(eve.arrival_time, UNKNOWN);
        assert_eq!(eve.price, UNKNOWN);
        assert!(eve.parsed_price.is_none());
    }

    #[test]
    fn test_self_closing_does_not_swallow_siblings() {
        let parser = FlightDetailsParser::new().unwrap();
        let xml = r#"<Passenger><Name>Finn</Name><Notes/><ArrivalCity>Lima</ArrivalCity></Passenger>
<Passenger><Name>Gus</Name><ArrivalCity>Quito</ArrivalCity></Passenger>"#;
        let flights = parser.parse(xml).unwrap();
        assert_eq!(flights.get("Finn").unwrap().arrival_city, "Lima");
        assert_eq!(flights.get("Gus").unwrap().arrival_city, "Quito");
    }

    #[test]
    fn test_cdata_text_is_kept() {
        let parser = FlightDetailsParser::new().unwrap();
        let xml = "<Passenger><Name><![CDATA[Hana & Ito]]></Name><DepartureCity>Osaka</DepartureCity></Passenger>";
        let flights = parser.parse(xml).unwrap();
        assert!(flights.get("Hana & Ito").is_some());
    }

    #[test]
    fn test_duplicate_passenger_replaces_in_place() {
        let parser = FlightDetailsParser::new().unwrap();
        let xml = r#"<r>
<Passenger><Name>Ann</Name><ArrivalCity>Rome</ArrivalCity></Passenger>
<Passenger><Name>Ben</Name><ArrivalCity>Oslo</ArrivalCity></Passenger>
<Passenger><Name>Ann</Name><ArrivalCity>Nice</ArrivalCity></Passenger>
</r>"#;
        let flights = parser.parse(xml).unwrap();
        let names: Vec<_> = flights.iter().map(|(name, _)| name).collect();
        assert_eq!(names, vec!["Ann", "Ben"]);
        assert_eq!(flights.get("Ann").unwrap().arrival_city, "Nice");
    }

    #[test]
    fn test_parse_empty_response() {
        let parser = FlightDetailsParser::new().unwrap();
        let result = parser.parse("<soap:Envelope><soap:Body/></soap:Envelope>");
        assert!(matches!(result, Err(TravelChatError::Parse(_))));
    }

    #[test]
    fn test_parse_fault() {
        let parser = FlightDetailsParser::new().unwrap();
        let xml = r#"<soap:Envelope xmlns:soap="http://schemas.xmlsoap.org/soap/envelope/">
<soap:Body><soap:Fault><faultcode>soap:Server</faultcode><faultstring>No flights for request</faultstring></soap:Fault></soap:Body>
</soap:Envelope>"#;
        match parser.parse(xml) {
            Err(TravelChatError::SoapFault(msg)) => assert_eq!(msg, "No flights for request"),
            other => panic!("expected fault, got {:?}", other),
        }
        assert_eq!(extract_fault(xml).as_deref(), Some("No flights for request"));
        assert!(extract_fault(NESTED_RESPONSE).is_none());
    }

    #[test]
    fn test_parse_price() {
        let parser = FlightDetailsParser::new().unwrap();
        assert_eq!(
            parser.parse_price("$350", None),
            Some(FlightPrice { amount: 350.0, currency: "$".to_string() })
        );
        assert_eq!(
            parser.parse_price("350.00 EUR", None),
            Some(FlightPrice { amount: 350.0, currency: "EUR".to_string() })
        );
        assert_eq!(
            parser.parse_price("1,024.99", Some("USD".to_string())),
            Some(FlightPrice { amount: 1024.99, currency: "USD".to_string() })
        );
        assert!(parser.parse_price("350", None).is_none());
        assert!(parser.parse_price("call for price", None).is_none());
    }

    #[test]
    fn test_normalize_name() {
        assert_eq!(normalize_name("ns1:DepartureCity"), "departurecity");
        assert_eq!(normalize_name("departure_city"), "departurecity");
        assert_eq!(normalize_name("arrival-time"), "arrivaltime");
    }

    #[test]
    fn test_passenger_flights_serializes_as_object() {
        let parser = FlightDetailsParser::new().unwrap();
        let flights = parser.parse(NESTED_RESPONSE).unwrap();
        let json = serde_json::to_value(&flights).unwrap();
        assert_eq!(json["Alice Smith"]["arrival_city"], "Paris");
        assert_eq!(json["Bob Jones"]["price"], "EUR 89");
    }
}
