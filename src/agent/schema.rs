use serde_json::{Value, json};

pub const AGENT_NAME: &str = "ShoppingAssistant";

const INSTRUCTIONS: &str = r#"You are a smart e-commerce assistant that helps users find deals, place orders, and manage their account.

## TOOLS & CAPABILITIES

### 1. Search Deals (get_deals)
- Returns structured 'deals' data.
- Default prices to "NULL" strings unless the user gave a price.

### 2. Place Order (place_order)
- REQUIRED: dealId, paymentMethod ("COD" or "ONLINE")
- You MUST ask the user for their preferred payment method ("Cash on Delivery" or "Online") BEFORE calling this tool.
- NEVER guess or default the payment method.
- If the user says "Buy this", your ONLY valid response is to ask: "Would you like to pay via Cash on Delivery or Pay Online?".

### 3. Account Tools (get_orders, get_payment_status, get_user_profile)
- Returns structured data for each type.

## PAYMENTS FOR EXISTING ORDERS
- If the user asks to "pay" for an EXISTING order or pending payment:
  - DO NOT use place_order with the order or payment ID. place_order is ONLY for new orders from deals.
  - INSTEAD use get_orders or get_payment_status. The returned card has a "Pay Now" button.

## OUTPUT
- Always answer with a single JSON object matching the output schema.
- When a tool returns records, set "type" to that record kind and copy the records into the matching field.
- When there is nothing to show, use "type": "text"."#;

pub fn instructions() -> &'static str {
    INSTRUCTIONS
}

/// Strict structured-output schema for the agent's final answer. Every
/// field is required; absent payloads are `null`.
pub fn output_schema() -> Value {
    json!({
        "type": "object",
        "additionalProperties": false,
        "properties": {
            "type": {
                "type": "string",
                "enum": ["text", "deals", "orders", "menu", "profile", "payments"],
                "description": "Type of the response"
            },
            "content": {
                "type": "string",
                "description": "Conversational text to display to the user"
            },
            "deals": nullable_array(json!({
                "type": "object",
                "additionalProperties": false,
                "properties": {
                    "id": { "type": "string" },
                    "title": { "type": "string" },
                    "description": { "type": "string" },
                    "price": { "type": "number" },
                    "imageURL": { "type": ["string", "null"] }
                },
                "required": ["id", "title", "description", "price", "imageURL"]
            })),
            "orders": nullable_array(json!({
                "type": "object",
                "additionalProperties": false,
                "properties": {
                    "id": { "type": "string" },
                    "productName": { "type": "string" },
                    "status": { "type": "string" },
                    "imageURL": { "type": ["string", "null"] },
                    "paymentUrl": { "type": ["string", "null"] }
                },
                "required": ["id", "productName", "status", "imageURL", "paymentUrl"]
            })),
            "payments": nullable_array(json!({
                "type": "object",
                "additionalProperties": false,
                "properties": {
                    "id": { "type": "string" },
                    "amountPaid": { "type": "number" },
                    "pendingAmount": { "type": "number" },
                    "orderId": { "type": "string" },
                    "productName": { "type": "string" },
                    "createdAt": { "type": "string" }
                },
                "required": ["id", "amountPaid", "pendingAmount", "orderId", "productName", "createdAt"]
            })),
            "summary": {
                "type": ["object", "null"],
                "additionalProperties": false,
                "properties": {
                    "totalPaid": { "type": "number" },
                    "totalPending": { "type": "number" },
                    "count": { "type": "number" }
                },
                "required": ["totalPaid", "totalPending", "count"]
            },
            "profile": {
                "type": ["object", "null"],
                "additionalProperties": false,
                "properties": {
                    "name": { "type": "string" },
                    "phone": { "type": ["string", "null"] },
                    "email": { "type": ["string", "null"] },
                    "address": { "type": ["string", "null"] },
                    "ordersCount": { "type": "number" },
                    "chatsCount": { "type": "number" },
                    "memberSince": { "type": "string" }
                },
                "required": ["name", "phone", "email", "address", "ordersCount", "chatsCount", "memberSince"]
            }
        },
        "required": ["type", "content", "deals", "orders", "payments", "summary", "profile"]
    })
}

fn nullable_array(items: Value) -> Value {
    json!({
        "type": ["array", "null"],
        "items": items
    })
}

#[cfg(test)]
mod tests {
    use super::output_schema;

    #[test]
    fn every_property_is_required() {
        let schema = output_schema();
        let properties = schema["properties"]
            .as_object()
            .expect("properties should be an object");
        let required = schema["required"]
            .as_array()
            .expect("required should be an array");
        assert_eq!(properties.len(), required.len());
        for name in properties.keys() {
            assert!(required.iter().any(|value| value == name), "{name} missing");
        }
    }
}
