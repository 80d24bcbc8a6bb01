use randomnumbers_sampler::{DEFAULT_COUNT, MAX_COUNT, RANGE_MAX, RANGE_MIN};
use serde_json::{json, Value};

/// OpenAPI 3 description of the served endpoints
pub(crate) fn document(accept_count: bool) -> Value {
    let numbers = json!({
        "type": "array",
        "items": {
            "type": "integer",
            "format": "int32",
            "minimum": RANGE_MIN,
            "maximum": RANGE_MAX,
        },
        "uniqueItems": true,
    });
    let plain_text = json!({ "text/plain": { "schema": { "type": "string" } } });

    let mut paths = serde_json::Map::new();
    paths.insert(
        "/randomnumbers".into(),
        json!({
            "get": {
                "summary": format!(
                    "Generates a distinct list of {DEFAULT_COUNT} random integers between {RANGE_MIN} and {RANGE_MAX}."
                ),
                "operationId": "getRandomNumbers",
                "responses": {
                    "200": {
                        "description": "Distinct integers",
                        "content": { "application/json": { "schema": numbers.clone() } },
                    },
                },
            },
        }),
    );
    if accept_count {
        paths.insert(
            "/randomnumbers/{count}".into(),
            json!({
                "get": {
                    "summary": "Generates a distinct list of random integers, with the total number specified.",
                    "operationId": "getRandomNumbersWithCount",
                    "parameters": [{
                        "name": "count",
                        "in": "path",
                        "required": true,
                        "schema": { "type": "integer", "minimum": 0, "maximum": MAX_COUNT },
                    }],
                    "responses": {
                        "200": {
                            "description": "Distinct integers",
                            "content": { "application/json": { "schema": numbers } },
                        },
                        "400": { "description": "Count out of bounds", "content": plain_text.clone() },
                        "422": {
                            "description": "Count exceeds the values available in the range",
                            "content": plain_text,
                        },
                    },
                },
            }),
        );
    }

    json!({
        "openapi": "3.0.1",
        "info": { "title": "Random numbers", "version": env!("CARGO_PKG_VERSION") },
        "paths": paths,
    })
}

#[cfg(test)]
mod test {
    use super::document;

    #[test]
    fn count_route_follows_toggle() {
        let with = document(true);
        assert!(with["paths"]["/randomnumbers/{count}"].is_object());
        assert_eq!(
            with["paths"]["/randomnumbers/{count}"]["get"]["parameters"][0]["schema"]["maximum"],
            100
        );

        let without = document(false);
        assert!(without["paths"]["/randomnumbers"].is_object());
        assert!(without["paths"].get("/randomnumbers/{count}").is_none());
    }
}
