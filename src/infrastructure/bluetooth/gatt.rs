//! GATT Surface Builder
//!
//! Declares the tracker's services and characteristics. The state machine
//! takes the resulting queue and hands the descriptors to the radio stack
//! one at a time.

use crate::infrastructure::bluetooth::protocol::{CharacteristicId, ServiceId};
use std::collections::VecDeque;
use uuid::Uuid;

/// Services awaiting registration, consumed front to back
pub type PendingServiceQueue = VecDeque<ServiceDescriptor>;

/// Characteristic properties as advertised to the central
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Properties {
    pub read: bool,
    pub write: bool,
    pub notify: bool,
}

/// Attribute access permissions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Permissions {
    pub readable: bool,
    pub writeable: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharacteristicDescriptor {
    pub id: CharacteristicId,
    pub properties: Properties,
    pub permissions: Permissions,
    pub description: &'static str,
}

impl CharacteristicDescriptor {
    pub fn uuid(&self) -> Uuid {
        self.id.uuid()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceDescriptor {
    pub id: ServiceId,
    pub primary: bool,
    pub characteristics: Vec<CharacteristicDescriptor>,
}

impl ServiceDescriptor {
    pub fn uuid(&self) -> Uuid {
        self.id.uuid()
    }

    pub fn characteristic(&self, id: CharacteristicId) -> Option<&CharacteristicDescriptor> {
        self.characteristics.iter().find(|c| c.id == id)
    }
}

/// Builds the fixed tracker GATT surface
#[derive(Debug, Clone, Copy)]
pub struct GattSurfaceBuilder {
    include_user_interface: bool,
}

impl GattSurfaceBuilder {
    pub fn new() -> Self {
        Self {
            include_user_interface: true,
        }
    }

    pub fn with_user_interface(mut self, enabled: bool) -> Self {
        self.include_user_interface = enabled;
        self
    }

    /// Services in registration order
    pub fn services(&self) -> Vec<ServiceId> {
        let mut services = vec![
            ServiceId::Connection,
            ServiceId::Configuration,
            ServiceId::Measurement,
        ];
        if self.include_user_interface {
            services.push(ServiceId::UserInterface);
        }
        services
    }

    /// Build the queue of service descriptors awaiting registration
    pub fn build(&self) -> PendingServiceQueue {
        self.services().into_iter().map(Self::describe).collect()
    }

    /// Service UUIDs placed in the advertisement
    pub fn advertised_uuids(&self) -> Vec<Uuid> {
        self.services().into_iter().map(ServiceId::uuid).collect()
    }

    fn describe(service: ServiceId) -> ServiceDescriptor {
        let characteristics = match service {
            ServiceId::Connection => vec![CharacteristicDescriptor {
                id: CharacteristicId::Disconnection,
                properties: Properties {
                    notify: true,
                    ..Default::default()
                },
                permissions: Permissions {
                    readable: true,
                    writeable: true,
                },
                description: "Disconnection",
            }],
            ServiceId::Configuration => vec![
                CharacteristicDescriptor {
                    id: CharacteristicId::UpdateRate,
                    properties: Properties {
                        read: true,
                        write: true,
                        notify: false,
                    },
                    permissions: Permissions {
                        readable: true,
                        writeable: true,
                    },
                    description: "Update rate (Hz)",
                },
                CharacteristicDescriptor {
                    id: CharacteristicId::ResetHeading,
                    properties: Properties {
                        write: true,
                        ..Default::default()
                    },
                    permissions: Permissions {
                        readable: true,
                        writeable: true,
                    },
                    description: "Reset heading",
                },
            ],
            ServiceId::Measurement => vec![CharacteristicDescriptor {
                id: CharacteristicId::Orientation,
                properties: Properties {
                    notify: true,
                    ..Default::default()
                },
                permissions: Permissions {
                    readable: false,
                    writeable: true,
                },
                description: "Orientation",
            }],
            ServiceId::UserInterface => vec![CharacteristicDescriptor {
                id: CharacteristicId::ButtonPressed,
                properties: Properties {
                    notify: true,
                    ..Default::default()
                },
                permissions: Permissions {
                    readable: true,
                    writeable: false,
                },
                description: "Button pressed",
            }],
        };

        ServiceDescriptor {
            id: service,
            primary: true,
            characteristics,
        }
    }
}

impl Default for GattSurfaceBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_order_and_count() {
        let queue = GattSurfaceBuilder::new().build();
        let ids: Vec<ServiceId> = queue.iter().map(|s| s.id).collect();
        assert_eq!(
            ids,
            vec![
                ServiceId::Connection,
                ServiceId::Configuration,
                ServiceId::Measurement,
                ServiceId::UserInterface
            ]
        );

        let without_ui = GattSurfaceBuilder::new().with_user_interface(false);
        assert_eq!(without_ui.build().len(), 3);
        assert!(!without_ui
            .advertised_uuids()
            .contains(&ServiceId::UserInterface.uuid()));
    }

    #[test]
    fn test_every_characteristic_lives_in_its_service() {
        for service in GattSurfaceBuilder::new().build() {
            assert!(service.primary);
            for characteristic in &service.characteristics {
                assert_eq!(characteristic.id.service(), service.id);
            }
        }
    }

    #[test]
    fn test_characteristic_properties() {
        let queue = GattSurfaceBuilder::new().build();
        let configuration = &queue[1];

        let rate = configuration
            .characteristic(CharacteristicId::UpdateRate)
            .unwrap();
        assert!(rate.properties.read && rate.properties.write && !rate.properties.notify);

        let heading = configuration
            .characteristic(CharacteristicId::ResetHeading)
            .unwrap();
        assert!(heading.properties.write && !heading.properties.read);

        let orientation = queue[2]
            .characteristic(CharacteristicId::Orientation)
            .unwrap();
        assert!(orientation.properties.notify);
    }
}
