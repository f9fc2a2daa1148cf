use optiflag::{Attributes, DecideOption, UserContext};

pub fn main() {
    env_logger::init();

    let sdk_key = std::env::var("OPTIFLAG_SDK_KEY").unwrap();
    let client = optiflag::ClientConfig::from_sdk_key(sdk_key)
        .event_processor(|event| println!("Event: {:?}", event))
        .to_client();

    // Block waiting for the datafile. Until this call returns, every decision is disabled with
    // an "SDK not ready" reason.
    if let Err(err) = client.wait_for_configuration() {
        eprintln!("Failed to fetch datafile: {err}");
    }

    let mut user = UserContext::new("test-user", Attributes::new());
    user.set_attribute("country", "us");

    let decision = client.decide(&user, "a-flag", &[DecideOption::IncludeReasons]);
    println!("Decision: {}", serde_json::to_string_pretty(&decision).unwrap());

    client.close();
}
