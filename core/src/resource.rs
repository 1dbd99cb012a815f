//! Request builders for the backend's CRUD resources.
//!
//! # Design
//! `ResourceClient` holds only the session token and builds `Request` values;
//! it never touches the connection. Callers pass the result to
//! `Dispatcher::send`. Resource names are plain path segments (`"orders"`,
//! `"racks"`), so this module knows nothing about any particular screen.

use serde_json::{Map, Value};

use crate::http::{Method, Request};

pub const TOKEN_HEADER: &str = "token";
pub const FILTERS_HEADER: &str = "filters";

#[derive(Debug, Clone, Default)]
pub struct ResourceClient {
    token: Option<String>,
}

impl ResourceClient {
    pub fn new(token: Option<String>) -> Self {
        Self { token }
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    pub fn set_token(&mut self, token: Option<String>) {
        self.token = token;
    }

    /// `GET /<resource>/<id>`
    pub fn get_one(&self, resource: &str, id: impl std::fmt::Display) -> Request {
        self.build(Method::Get, item_url(resource, id))
    }

    /// `GET /<resource>/`, with optional filters carried as a header.
    pub fn get_all(&self, resource: &str, filters: Option<Map<String, Value>>) -> Request {
        let request = self.build(Method::Get, collection_url(resource));
        match filters {
            Some(filters) => request.with_header(FILTERS_HEADER, Value::Object(filters)),
            None => request,
        }
    }

    /// `POST /<resource>/`
    pub fn create(&self, resource: &str, body: Map<String, Value>) -> Request {
        self.build(Method::Post, collection_url(resource)).with_body(body)
    }

    /// `PUT /<resource>/<id>`
    pub fn update(&self, resource: &str, id: impl std::fmt::Display, body: Map<String, Value>) -> Request {
        self.build(Method::Put, item_url(resource, id)).with_body(body)
    }

    /// `DELETE /<resource>/<id>`
    pub fn delete(&self, resource: &str, id: impl std::fmt::Display) -> Request {
        self.build(Method::Delete, item_url(resource, id))
    }

    fn build(&self, method: Method, url: String) -> Request {
        let request = Request::new(method, url);
        match &self.token {
            Some(token) => request.with_header(TOKEN_HEADER, token.as_str()),
            None => request,
        }
    }
}

fn collection_url(resource: &str) -> String {
    format!("/{}/", resource.trim_matches('/'))
}

fn item_url(resource: &str, id: impl std::fmt::Display) -> String {
    format!("/{}/{id}", resource.trim_matches('/'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn client() -> ResourceClient {
        ResourceClient::new(Some("secret".to_string()))
    }

    #[test]
    fn get_one_produces_correct_request() {
        let req = client().get_one("orders", 42);
        assert_eq!(req.method, Method::Get);
        assert_eq!(req.url, "/orders/42");
        assert!(req.body.is_empty());
        assert_eq!(req.headers.get(TOKEN_HEADER), Some(&json!("secret")));
    }

    #[test]
    fn get_all_carries_filters_in_headers() {
        let mut filters = Map::new();
        filters.insert("warehouse_id".to_string(), json!(3));
        let req = client().get_all("racks", Some(filters));
        assert_eq!(req.url, "/racks/");
        assert_eq!(req.headers.get(FILTERS_HEADER), Some(&json!({"warehouse_id": 3})));
        assert_eq!(req.headers.get(TOKEN_HEADER), Some(&json!("secret")));
    }

    #[test]
    fn get_all_without_filters_has_only_token() {
        let req = client().get_all("companies", None);
        assert_eq!(req.headers.len(), 1);
    }

    #[test]
    fn create_produces_correct_request() {
        let mut body = Map::new();
        body.insert("name".to_string(), json!("Acme Freight"));
        let req = client().create("vendors", body);
        assert_eq!(req.method, Method::Post);
        assert_eq!(req.url, "/vendors/");
        assert_eq!(req.body.get("name"), Some(&json!("Acme Freight")));
    }

    #[test]
    fn update_produces_correct_request() {
        let mut body = Map::new();
        body.insert("status".to_string(), json!("shipped"));
        let req = client().update("order", 7, body);
        assert_eq!(req.method, Method::Put);
        assert_eq!(req.url, "/order/7");
        assert_eq!(req.body.get("status"), Some(&json!("shipped")));
    }

    #[test]
    fn delete_produces_correct_request() {
        let req = client().delete("transports", "t-9");
        assert_eq!(req.method, Method::Delete);
        assert_eq!(req.url, "/transports/t-9");
    }

    #[test]
    fn slashes_in_resource_are_normalized() {
        assert_eq!(client().get_one("/warehouses/", 1).url, "/warehouses/1");
        assert_eq!(client().get_all("/warehouses", None).url, "/warehouses/");
    }

    #[test]
    fn anonymous_client_sends_no_token() {
        let req = ResourceClient::default().get_one("users", 1);
        assert!(req.headers.is_empty());
    }
}
