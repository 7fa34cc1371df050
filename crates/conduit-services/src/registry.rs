//! Service definitions and provider bindings.
//!
//! A binding holds a locked deposit. While the binding is available the
//! deposit must cover `max(price × min_deposit_multiple, min_deposit)`; a
//! disabled binding may release its deposit after `deposit_refund_delay` blocks.

use conduit_core::coins::Coins;
use conduit_core::msgs::{
    BindService, DefineService, DisableServiceBinding, EnableServiceBinding,
    RefundServiceDeposit, SetWithdrawAddress, UpdateServiceBinding,
};
use conduit_core::types::{Address, Pricing, ServiceBinding, ServiceDefinition};
use conduit_core::{Result, ServiceError};

use crate::keeper::Txn;
use crate::keys;
use crate::store::{get_json, put_json};

fn binding_label(service_name: &str, provider: &Address) -> String {
    format!("{service_name}/{provider}")
}

impl Txn<'_> {
    pub(crate) fn definition(&self, name: &str) -> Result<Option<ServiceDefinition>> {
        Ok(get_json(&*self.store, &keys::service_definition(name))?)
    }

    pub(crate) fn binding(
        &self,
        service_name: &str,
        provider: &Address,
    ) -> Result<Option<ServiceBinding>> {
        Ok(get_json(&*self.store, &keys::service_binding(service_name, provider))?)
    }

    fn existing_binding(&self, service_name: &str, provider: &Address) -> Result<ServiceBinding> {
        self.binding(service_name, provider)?.ok_or_else(|| {
            ServiceError::UnknownServiceBinding(binding_label(service_name, provider))
        })
    }

    fn save_binding(&mut self, binding: &ServiceBinding) -> Result<()> {
        let key = keys::service_binding(&binding.service_name, &binding.provider);
        put_json(self.store, &key, binding)?;
        Ok(())
    }

    pub(crate) fn payout_address(&self, provider: &Address) -> Result<Address> {
        Ok(get_json(&*self.store, &keys::withdraw_address(provider))?
            .unwrap_or_else(|| provider.clone()))
    }

    /// Whether `binding` holds enough deposit for its current price.
    pub(crate) fn deposit_sufficient(&self, binding: &ServiceBinding) -> bool {
        let required = self.config.min_deposit_for(&binding.pricing.price);
        binding.deposit.is_all_gte(&required)
    }

    fn require_sufficient_deposit(&self, binding: &ServiceBinding) -> Result<()> {
        if self.deposit_sufficient(binding) {
            return Ok(());
        }
        Err(ServiceError::InsufficientDeposit(format!(
            "{} holds {}, needs {}",
            binding_label(&binding.service_name, &binding.provider),
            binding.deposit,
            self.config.min_deposit_for(&binding.pricing.price)
        )))
    }

    pub(crate) fn define_service(&mut self, msg: &DefineService) -> Result<()> {
        msg.validate_basic()?;
        if self.definition(&msg.name)?.is_some() {
            return Err(ServiceError::ServiceDefinitionExists(msg.name.clone()));
        }
        let definition = ServiceDefinition {
            name: msg.name.clone(),
            description: msg.description.clone(),
            tags: msg.tags.clone(),
            author: msg.author.clone(),
            author_description: msg.author_description.clone(),
            schemas: msg.schemas.clone(),
        };
        put_json(self.store, &keys::service_definition(&msg.name), &definition)?;
        tracing::info!(service = %msg.name, author = %msg.author, "service defined");
        Ok(())
    }

    pub(crate) fn bind_service(&mut self, msg: &BindService) -> Result<()> {
        msg.validate_basic()?;
        if self.definition(&msg.service_name)?.is_none() {
            return Err(ServiceError::UnknownServiceDefinition(msg.service_name.clone()));
        }
        if self.binding(&msg.service_name, &msg.provider)?.is_some() {
            return Err(ServiceError::ServiceBindingExists(binding_label(
                &msg.service_name,
                &msg.provider,
            )));
        }
        let binding = ServiceBinding {
            service_name: msg.service_name.clone(),
            provider: msg.provider.clone(),
            deposit: msg.deposit.clone(),
            pricing: Pricing::parse(&msg.pricing)?,
            min_resp_time: msg.min_resp_time,
            available: true,
            disabled_height: 0,
        };
        self.require_sufficient_deposit(&binding)?;
        self.ledger.lock_deposit(&msg.provider, &msg.deposit)?;
        self.save_binding(&binding)?;
        tracing::info!(
            service = %msg.service_name,
            provider = %msg.provider,
            deposit = %msg.deposit,
            "service bound"
        );
        Ok(())
    }

    pub(crate) fn update_service_binding(&mut self, msg: &UpdateServiceBinding) -> Result<()> {
        msg.validate_basic()?;
        let mut binding = self.existing_binding(&msg.service_name, &msg.provider)?;
        if !msg.pricing.is_empty() {
            binding.pricing = Pricing::parse(&msg.pricing)?;
        }
        if msg.min_resp_time > 0 {
            binding.min_resp_time = msg.min_resp_time;
        }
        if !msg.deposit.is_empty() {
            binding.deposit = binding.deposit.add(&msg.deposit);
        }
        // A disabled binding is re-checked when it is enabled.
        if binding.available {
            self.require_sufficient_deposit(&binding)?;
        }
        if !msg.deposit.is_empty() {
            self.ledger.lock_deposit(&msg.provider, &msg.deposit)?;
        }
        self.save_binding(&binding)?;
        tracing::info!(service = %msg.service_name, provider = %msg.provider, "service binding updated");
        Ok(())
    }

    pub(crate) fn disable_service_binding(&mut self, msg: &DisableServiceBinding) -> Result<()> {
        msg.validate_basic()?;
        let mut binding = self.existing_binding(&msg.service_name, &msg.provider)?;
        if !binding.available {
            return Err(ServiceError::BindingUnavailable(binding_label(
                &msg.service_name,
                &msg.provider,
            )));
        }
        binding.available = false;
        binding.disabled_height = self.height();
        self.save_binding(&binding)?;
        tracing::info!(service = %msg.service_name, provider = %msg.provider, "service binding disabled");
        Ok(())
    }

    pub(crate) fn enable_service_binding(&mut self, msg: &EnableServiceBinding) -> Result<()> {
        msg.validate_basic()?;
        let mut binding = self.existing_binding(&msg.service_name, &msg.provider)?;
        if binding.available {
            return Err(ServiceError::BindingAvailable(binding_label(
                &msg.service_name,
                &msg.provider,
            )));
        }
        binding.deposit = binding.deposit.add(&msg.deposit);
        self.require_sufficient_deposit(&binding)?;
        if !msg.deposit.is_empty() {
            self.ledger.lock_deposit(&msg.provider, &msg.deposit)?;
        }
        binding.available = true;
        binding.disabled_height = 0;
        self.save_binding(&binding)?;
        tracing::info!(service = %msg.service_name, provider = %msg.provider, "service binding enabled");
        Ok(())
    }

    pub(crate) fn refund_service_deposit(&mut self, msg: &RefundServiceDeposit) -> Result<()> {
        msg.validate_basic()?;
        let mut binding = self.existing_binding(&msg.service_name, &msg.provider)?;
        let label = binding_label(&msg.service_name, &msg.provider);
        if binding.available {
            return Err(ServiceError::BindingAvailable(label));
        }
        if binding.deposit.is_zero() {
            return Err(ServiceError::InvalidDeposit(format!("{label} holds no deposit")));
        }
        let unlock_height = binding.disabled_height + self.config.deposit_refund_delay;
        if self.height() < unlock_height {
            return Err(ServiceError::DepositLocked(format!(
                "{label} unlocks at height {unlock_height}"
            )));
        }
        self.ledger.release_deposit(&msg.provider, &binding.deposit)?;
        tracing::info!(
            service = %msg.service_name,
            provider = %msg.provider,
            deposit = %binding.deposit,
            "service deposit refunded"
        );
        binding.deposit = Coins::new();
        self.save_binding(&binding)
    }

    pub(crate) fn set_withdraw_address(&mut self, msg: &SetWithdrawAddress) -> Result<()> {
        msg.validate_basic()?;
        put_json(self.store, &keys::withdraw_address(&msg.provider), &msg.withdraw_address)?;
        tracing::info!(provider = %msg.provider, withdraw_address = %msg.withdraw_address, "withdraw address set");
        Ok(())
    }
}
