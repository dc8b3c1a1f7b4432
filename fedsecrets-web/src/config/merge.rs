use super::{
    AzureAdLayer, ConfigLayer, ConfigSource, HttpLayer, KeyVaultLayer, ManagedIdentityLayer,
    ProvenanceMap, RetryLayer, ServerLayer, TargetLayer,
};

/// Overlay `layer` onto `config`, recording where each set key came from.
pub fn apply_layer(
    config: &mut ConfigLayer,
    layer: ConfigLayer,
    source: ConfigSource,
    provenance: &mut ProvenanceMap,
) {
    let mut merge = Merge { source, provenance };

    if let Some(layer) = layer.azure_ad {
        merge.azure_ad(config.azure_ad.get_or_insert_with(Default::default), layer);
    }
    if let Some(layer) = layer.managed_identity {
        merge.managed_identity(
            config.managed_identity.get_or_insert_with(Default::default),
            layer,
        );
    }
    if let Some(layer) = layer.same_tenant {
        merge.target(
            "SameTenant",
            config.same_tenant.get_or_insert_with(Default::default),
            layer,
        );
    }
    if let Some(layer) = layer.cross_tenant {
        merge.target(
            "CrossTenant",
            config.cross_tenant.get_or_insert_with(Default::default),
            layer,
        );
    }
    if let Some(layer) = layer.key_vault {
        merge.key_vault(config.key_vault.get_or_insert_with(Default::default), layer);
    }
    if let Some(layer) = layer.server {
        merge.server(config.server.get_or_insert_with(Default::default), layer);
    }
    if let Some(layer) = layer.http {
        merge.http(config.http.get_or_insert_with(Default::default), layer);
    }
    if let Some(layer) = layer.retry {
        merge.retry(config.retry.get_or_insert_with(Default::default), layer);
    }
}

struct Merge<'a> {
    source: ConfigSource,
    provenance: &'a mut ProvenanceMap,
}

impl Merge<'_> {
    fn set<T>(&mut self, target: &mut Option<T>, value: Option<T>, path: &str) {
        if let Some(value) = value {
            *target = Some(value);
            self.provenance.insert(path.to_string(), self.source);
        }
    }

    fn azure_ad(&mut self, target: &mut AzureAdLayer, layer: AzureAdLayer) {
        self.set(&mut target.instance, layer.instance, "AzureAd.Instance");
        self.set(&mut target.tenant_id, layer.tenant_id, "AzureAd.TenantId");
        self.set(&mut target.client_id, layer.client_id, "AzureAd.ClientId");
        self.set(&mut target.callback_path, layer.callback_path, "AzureAd.CallbackPath");
    }

    fn managed_identity(&mut self, target: &mut ManagedIdentityLayer, layer: ManagedIdentityLayer) {
        self.set(&mut target.client_id, layer.client_id, "ManagedIdentity.ClientId");
        self.set(&mut target.endpoint, layer.endpoint, "ManagedIdentity.Endpoint");
    }

    fn target(&mut self, section: &str, target: &mut TargetLayer, layer: TargetLayer) {
        self.set(
            &mut target.key_vault_uri,
            layer.key_vault_uri,
            &format!("{section}.KeyVaultUri"),
        );
        self.set(
            &mut target.secret_name,
            layer.secret_name,
            &format!("{section}.SecretName"),
        );
        self.set(
            &mut target.tenant_id,
            layer.tenant_id,
            &format!("{section}.TenantId"),
        );
    }

    fn key_vault(&mut self, target: &mut KeyVaultLayer, layer: KeyVaultLayer) {
        self.set(&mut target.scope, layer.scope, "KeyVault.Scope");
    }

    fn server(&mut self, target: &mut ServerLayer, layer: ServerLayer) {
        self.set(&mut target.bind_address, layer.bind_address, "Server.BindAddress");
        self.set(&mut target.public_base_url, layer.public_base_url, "Server.PublicBaseUrl");
        self.set(&mut target.session_ttl_secs, layer.session_ttl_secs, "Server.SessionTtlSecs");
    }

    fn http(&mut self, target: &mut HttpLayer, layer: HttpLayer) {
        self.set(&mut target.timeout_secs, layer.timeout_secs, "Http.TimeoutSecs");
    }

    fn retry(&mut self, target: &mut RetryLayer, layer: RetryLayer) {
        self.set(&mut target.max_attempts, layer.max_attempts, "Retry.MaxAttempts");
        self.set(&mut target.base_delay_ms, layer.base_delay_ms, "Retry.BaseDelayMs");
    }
}
