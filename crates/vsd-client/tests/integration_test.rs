//! Integration tests for the VSD client
//!
//! These tests require a reachable VSD.
//! Set VSD_URL, VSD_USERNAME, VSD_PASSWORD and VSD_ENTERPRISE to run.

use vsd_client::{VsdClient, VsdClientTrait, VsdCredentials};

fn client() -> VsdClient {
    let url = std::env::var("VSD_URL").unwrap_or_else(|_| "https://localhost:8443".to_string());
    let username = std::env::var("VSD_USERNAME").unwrap_or_else(|_| "csproot".to_string());
    let password = std::env::var("VSD_PASSWORD").expect("VSD_PASSWORD environment variable must be set");

    VsdClient::new(url, "v5_0", VsdCredentials::password(username, password, "csp"))
        .expect("Failed to create client")
}

#[tokio::test]
#[ignore] // Requires running VSD instance
async fn test_start_session() {
    let client = client();
    let me = client.start_session().await.expect("Failed to start session");
    assert!(me.api_key.is_some(), "Session should carry an API key");
}

#[tokio::test]
#[ignore]
async fn test_find_enterprise() {
    let client = client();
    client.start_session().await.expect("Failed to start session");

    let name = std::env::var("VSD_ENTERPRISE").unwrap_or_else(|_| "k8s".to_string());
    let enterprise = client.find_enterprise(&name).await.expect("Failed to query enterprises");
    println!("Enterprise {}: {:?}", name, enterprise);
}

#[tokio::test]
#[ignore]
async fn test_find_missing_zone_is_none() {
    let client = client();
    client.start_session().await.expect("Failed to start session");

    let name = std::env::var("VSD_ENTERPRISE").unwrap_or_else(|_| "k8s".to_string());
    let enterprise = client
        .find_enterprise(&name)
        .await
        .expect("Failed to query enterprises")
        .expect("Enterprise must exist");
    let domain_name = std::env::var("VSD_DOMAIN").unwrap_or_else(|_| "k8s".to_string());
    let domain = client
        .find_domain(enterprise.id.as_deref().unwrap_or_default(), &domain_name)
        .await
        .expect("Failed to query domains")
        .expect("Domain must exist");

    let zone = client
        .find_zone(domain.id.as_deref().unwrap_or_default(), "no such zone")
        .await
        .expect("Failed to query zones");
    assert!(zone.is_none());
}
