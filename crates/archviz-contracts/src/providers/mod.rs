#[derive(Debug, Clone)]
pub struct ProviderRegistry<T: NamedProvider> {
    providers: Vec<T>,
}

pub trait NamedProvider {
    fn name(&self) -> &str;
}

impl<T: NamedProvider> Default for ProviderRegistry<T> {
    fn default() -> Self {
        Self {
            providers: Vec::new(),
        }
    }
}

impl<T: NamedProvider> ProviderRegistry<T> {
    pub fn new(providers: Vec<T>) -> Self {
        Self { providers }
    }

    pub fn push(&mut self, provider: T) {
        self.providers.push(provider);
    }

    pub fn get(&self, name: &str) -> Option<&T> {
        self.providers
            .iter()
            .find(|provider| provider.name() == name)
    }

    pub fn list(&self) -> Vec<String> {
        let mut names = self
            .providers
            .iter()
            .map(|provider| provider.name().to_string())
            .collect::<Vec<String>>();
        names.sort();
        names
    }

    pub fn providers(&self) -> &[T] {
        self.providers.as_slice()
    }

    pub fn first_some<R>(&self, mut lookup: impl FnMut(&T) -> Option<R>) -> Option<(String, R)> {
        self.providers.iter().find_map(|provider| {
            lookup(provider).map(|value| (provider.name().to_string(), value))
        })
    }
}
