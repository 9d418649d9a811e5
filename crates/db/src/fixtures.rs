use rust_decimal::Decimal;
use secrecy::SecretString;

use slotline_core::domain::offering::{Offering, OfferingId};
use slotline_core::domain::tenant::{
    ActiveFlow, ChannelIdentity, RateLimitPolicy, TenantChannelCredential, TenantId,
    TenantProfile,
};

use crate::repositories::{RepositoryError, Repositories};

/// Demo tenant used by `slotline seed` and local end-to-end runs.
pub struct DemoSeedDataset;

pub const DEMO_TENANT_ID: &str = "demo-salon";
pub const DEMO_CHANNEL_IDENTITY: &str = "15550000000";

const DEMO_OFFERINGS: &[DemoOffering] = &[
    DemoOffering { id: "demo-haircut", name: "Haircut", price_cents: 2500, duration_minutes: 30 },
    DemoOffering { id: "demo-massage", name: "Massage", price_cents: 6000, duration_minutes: 60 },
    DemoOffering { id: "demo-manicure", name: "Manicure", price_cents: 3000, duration_minutes: 45 },
];

struct DemoOffering {
    id: &'static str,
    name: &'static str,
    price_cents: i64,
    duration_minutes: u32,
}

impl DemoSeedDataset {
    /// Upserts the demo tenant, its channel credential and offerings. Safe to
    /// run repeatedly.
    pub async fn load(repositories: &Repositories) -> Result<SeedResult, RepositoryError> {
        let tenant_id = TenantId(DEMO_TENANT_ID.to_string());

        repositories
            .tenants
            .save_profile(TenantProfile {
                tenant_id: tenant_id.clone(),
                display_name: "Demo Salon".to_string(),
                currency: "USD".to_string(),
                active_flow: ActiveFlow::Booking,
            })
            .await?;
        repositories
            .tenants
            .save_credential(TenantChannelCredential {
                tenant_id: tenant_id.clone(),
                channel_identity: ChannelIdentity(DEMO_CHANNEL_IDENTITY.to_string()),
                secret: SecretString::from("demo-channel-token".to_string()),
                rate_limit: RateLimitPolicy::default(),
            })
            .await?;

        for offering in DEMO_OFFERINGS {
            repositories
                .offerings
                .save(Offering {
                    id: OfferingId(offering.id.to_string()),
                    tenant_id: tenant_id.clone(),
                    name: offering.name.to_string(),
                    price: Decimal::new(offering.price_cents, 2),
                    duration_minutes: offering.duration_minutes,
                    active: true,
                })
                .await?;
        }

        Ok(SeedResult {
            tenant_id: DEMO_TENANT_ID,
            channel_identity: DEMO_CHANNEL_IDENTITY,
            offerings_seeded: DEMO_OFFERINGS.iter().map(|offering| offering.id).collect(),
        })
    }

    pub async fn verify(repositories: &Repositories) -> Result<VerificationResult, RepositoryError> {
        let tenant_id = TenantId(DEMO_TENANT_ID.to_string());
        let mut checks = Vec::new();

        let resolved = repositories
            .tenants
            .find_by_channel_identity(&ChannelIdentity(DEMO_CHANNEL_IDENTITY.to_string()))
            .await?;
        checks.push((
            "channel identity resolves to demo tenant",
            resolved.is_some_and(|profile| profile.tenant_id == tenant_id),
        ));

        let credential = repositories.tenants.find_credential(&tenant_id).await?;
        checks.push(("demo credential present", credential.is_some()));

        let active = repositories.offerings.list_active(&tenant_id).await?;
        for offering in DEMO_OFFERINGS {
            let present = active.iter().any(|candidate| candidate.id.0 == offering.id);
            checks.push((offering.name, present));
        }

        Ok(VerificationResult { all_present: checks.iter().all(|(_, ok)| *ok), checks })
    }
}

#[derive(Clone, Debug)]
pub struct SeedResult {
    pub tenant_id: &'static str,
    pub channel_identity: &'static str,
    pub offerings_seeded: Vec<&'static str>,
}

#[derive(Clone, Debug)]
pub struct VerificationResult {
    pub all_present: bool,
    pub checks: Vec<(&'static str, bool)>,
}
